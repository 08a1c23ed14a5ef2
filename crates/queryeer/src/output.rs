use queryeer_core::{Batch, ColumnMeta, DbError, RowWriter, Value};

/// Writes result sets as tab separated text.
#[derive(Default)]
pub struct ConsoleWriter {
    line: Vec<String>,
}

impl RowWriter for ConsoleWriter {
    fn start_result_set(&mut self, columns: &[ColumnMeta]) {
        let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        println!("{}", header.join("\t"));
    }

    fn start_row(&mut self) {
        self.line.clear();
    }

    fn write_field_name(&mut self, _name: &str) {}

    fn write_value(&mut self, value: &Value) {
        self.line.push(value.as_display_string());
    }

    fn end_row(&mut self) {
        println!("{}", self.line.join("\t"));
    }

    fn end_result_set(&mut self, row_count: usize) {
        println!("({} row(s))\n", row_count);
    }

    fn message(&mut self, text: &str) {
        println!("{}", text);
    }

    fn error(&mut self, batch: &Batch, error: &DbError) {
        eprintln!("Error in batch at line {}: {}", batch.start_line, error);
    }
}
