use crate::{ColumnMeta, DbError, QuerySession, StatementResult, Value};
use std::time::{Duration, Instant};

/// A chunk of script text sent to the server in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub text: String,
    /// 1-based line of the batch's first line in the script.
    pub start_line: usize,
}

/// Splits `text` on lines consisting only of `delimiter`.
///
/// Matching is case-insensitive and tolerates surrounding whitespace and a
/// trailing `;`. Without a delimiter the whole text is one batch. Batches
/// containing only whitespace are dropped.
pub fn split_batches(text: &str, delimiter: Option<&str>) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 1;

    let mut flush = |lines: &mut Vec<&str>, start_line: usize| {
        let body = lines.join("\n");
        if !body.trim().is_empty() {
            batches.push(Batch {
                text: body,
                start_line,
            });
        }
        lines.clear();
    };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(delimiter) = delimiter
            && is_delimiter_line(line, delimiter)
        {
            flush(&mut current, start_line);
            start_line = line_no + 1;
            continue;
        }

        if current.is_empty() && line.trim().is_empty() {
            start_line = line_no + 1;
            continue;
        }

        current.push(line);
    }

    flush(&mut current, start_line);
    batches
}

fn is_delimiter_line(line: &str, delimiter: &str) -> bool {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    trimmed.eq_ignore_ascii_case(delimiter)
}

/// Sink for execution output.
pub trait RowWriter {
    fn start_result_set(&mut self, columns: &[ColumnMeta]);

    fn start_row(&mut self);

    fn write_field_name(&mut self, name: &str);

    fn write_value(&mut self, value: &Value);

    fn end_row(&mut self);

    fn end_result_set(&mut self, row_count: usize);

    fn message(&mut self, text: &str);

    fn error(&mut self, batch: &Batch, error: &DbError);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub batches: usize,
    pub result_sets: usize,
    pub rows: usize,
    pub rows_affected: u64,
    pub errors: usize,
    pub aborted: bool,
    pub elapsed: Duration,
}

enum BatchOutcome {
    Done,
    Aborted,
    Failed(DbError),
}

/// Runs scripts against a [`QuerySession`].
pub struct QueryExecutor;

impl QueryExecutor {
    /// Executes every batch of `text`, streaming results into `writer`.
    ///
    /// Connection and credential failures while acquiring the connection are
    /// returned. Statement failures are written to `writer` and execution
    /// moves on to the next batch, unless the connection died with them.
    pub fn execute(
        session: &QuerySession,
        text: &str,
        writer: &mut dyn RowWriter,
    ) -> Result<ExecutionSummary, DbError> {
        let started = Instant::now();
        let result = Self::run(session, text, writer);
        session.end_execution();

        result.map(|mut summary| {
            summary.elapsed = started.elapsed();
            summary
        })
    }

    /// Like [`execute`](Self::execute), but on a credentials failure asks for
    /// credentials again and retries once.
    pub fn execute_with_reauth(
        session: &QuerySession,
        text: &str,
        writer: &mut dyn RowWriter,
    ) -> Result<ExecutionSummary, DbError> {
        match Self::execute(session, text, writer) {
            Err(e) if e.is_credentials() => {
                log::info!(
                    "Credentials rejected for '{}', asking again",
                    session.profile().name
                );
                session.resolver().invalidate(session.profile().id);

                if !session.resolver().prepare(&session.profile(), false) {
                    return Err(e);
                }
                Self::execute(session, text, writer)
            }
            other => other,
        }
    }

    fn run(
        session: &QuerySession,
        text: &str,
        writer: &mut dyn RowWriter,
    ) -> Result<ExecutionSummary, DbError> {
        let mut summary = ExecutionSummary::default();
        let profile = session.profile();
        let batches = split_batches(text, profile.kind.batch_delimiter());

        if batches.is_empty() {
            return Ok(summary);
        }

        if session.is_aborted() {
            log::info!("Execution on '{}' aborted before it started", profile.name);
            summary.aborted = true;
            return Ok(summary);
        }

        if !session.resolver().prepare(&profile, false) {
            return Err(DbError::Credentials(format!(
                "No credentials for '{}'",
                profile.name
            )));
        }

        let connection = session.get_connection()?;

        for batch in &batches {
            if session.is_aborted() {
                summary.aborted = true;
                break;
            }

            summary.batches += 1;
            log::debug!(
                "Executing batch at line {} on '{}'",
                batch.start_line,
                profile.name
            );

            let outcome = match connection.execute(&batch.text) {
                Ok(mut cursor) => Self::drain(session, cursor.as_mut(), writer, &mut summary),
                Err(e) => BatchOutcome::Failed(e),
            };

            match outcome {
                BatchOutcome::Done => {}
                BatchOutcome::Aborted => {
                    summary.aborted = true;
                    break;
                }
                BatchOutcome::Failed(e) => {
                    if session.is_aborted() {
                        summary.aborted = true;
                        break;
                    }

                    summary.errors += 1;
                    writer.error(batch, &e);

                    if !connection.is_valid(session.validation_timeout()) {
                        log::warn!(
                            "Connection of '{}' lost during execution",
                            profile.name
                        );
                        return Err(DbError::ConnectionLost(e.to_string()));
                    }
                }
            }
        }

        if summary.aborted {
            log::info!("Execution on '{}' aborted", profile.name);
        }

        Ok(summary)
    }

    fn drain(
        session: &QuerySession,
        cursor: &mut dyn crate::StatementCursor,
        writer: &mut dyn RowWriter,
        summary: &mut ExecutionSummary,
    ) -> BatchOutcome {
        loop {
            if session.is_aborted() {
                return BatchOutcome::Aborted;
            }

            let next = match cursor.next_result() {
                Ok(Some(next)) => next,
                Ok(None) => return BatchOutcome::Done,
                Err(e) => return BatchOutcome::Failed(e),
            };

            match next {
                StatementResult::UpdateCount(count) => {
                    summary.rows_affected += count;
                    writer.message(&format!("{} row(s) affected", count));
                }
                StatementResult::ResultSet(result) => {
                    summary.result_sets += 1;
                    writer.start_result_set(&result.columns);

                    let mut written = 0;
                    for row in &result.rows {
                        if session.is_aborted() {
                            writer.end_result_set(written);
                            summary.rows += written;
                            return BatchOutcome::Aborted;
                        }

                        writer.start_row();
                        for (column, value) in result.columns.iter().zip(row) {
                            writer.write_field_name(&column.name);
                            writer.write_value(value);
                        }
                        writer.end_row();
                        written += 1;
                    }

                    writer.end_result_set(written);
                    summary.rows += written;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(batches: &[Batch]) -> Vec<&str> {
        batches.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn no_delimiter_is_one_batch() {
        let batches = split_batches("select 1;\nGO\nselect 2;", None);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].start_line, 1);
    }

    #[test]
    fn splits_on_standalone_delimiter() {
        let script = "select 1\nGO\nselect 2\n  go;  \nselect 3";
        let batches = split_batches(script, Some("GO"));

        assert_eq!(texts(&batches), vec!["select 1", "select 2", "select 3"]);
        assert_eq!(
            batches.iter().map(|b| b.start_line).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
    }

    #[test]
    fn delimiter_inside_a_line_does_not_split() {
        let script = "select 'GO' as go\nfrom t";
        let batches = split_batches(script, Some("GO"));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].text, script);
    }

    #[test]
    fn blank_batches_are_skipped() {
        let script = "\n\nGO\n   \nGO\n\nselect 1\nGO\n";
        let batches = split_batches(script, Some("GO"));

        assert_eq!(texts(&batches), vec!["select 1"]);
        assert_eq!(batches[0].start_line, 7);
    }

    #[test]
    fn empty_script_has_no_batches() {
        assert!(split_batches("", Some("GO")).is_empty());
        assert!(split_batches("   \n\t", None).is_empty());
    }
}
