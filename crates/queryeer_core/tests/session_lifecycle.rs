use queryeer_core::{
    CatalogCrawler, ConnectionProfile, CredentialResolver, CryptoService, DbError, DbKind,
    NoPrompt, QuerySession, SessionState, WorkerPool,
};
use queryeer_test_support::{FakeDriver, fixtures};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn resolver() -> Arc<CredentialResolver> {
    Arc::new(CredentialResolver::new(
        Arc::new(CryptoService::new()),
        Arc::new(NoPrompt),
    ))
}

fn session(profile: ConnectionProfile, driver: &FakeDriver) -> QuerySession {
    QuerySession::new(
        profile,
        driver.clone().as_driver_arc(),
        resolver(),
        Duration::from_secs(1),
    )
}

fn mysql_driver() -> FakeDriver {
    FakeDriver::new(DbKind::MySql).with_databases(&["app", "audit"])
}

// ---------------------------------------------------------------------------
// Connecting
// ---------------------------------------------------------------------------

#[test]
fn first_connection_adopts_server_default_database() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    assert_eq!(session.state(), SessionState::Disconnected);

    session.get_connection()?;

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.database().as_deref(), Some("app"));
    assert!(driver.stats().set_database_calls.is_empty());
    Ok(())
}

#[test]
fn profile_default_database_is_applied_on_connect() -> Result<(), DbError> {
    let driver = mysql_driver();
    let profile = fixtures::profile("my", DbKind::MySql).with_default_database("audit");
    let session = session(profile, &driver);

    session.get_connection()?;

    assert_eq!(session.database().as_deref(), Some("audit"));
    assert_eq!(driver.stats().set_database_calls, vec!["audit".to_string()]);
    Ok(())
}

#[test]
fn valid_connection_is_reused() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);

    session.get_connection()?;
    session.get_connection()?;

    assert_eq!(driver.stats().connect_calls, 1);
    Ok(())
}

#[test]
fn dead_connection_is_replaced_and_database_restored() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);

    session.set_database("audit")?;
    driver.kill_connections();

    session.get_connection()?;

    let stats = driver.stats();
    assert_eq!(stats.connect_calls, 2);
    assert_eq!(stats.close_calls, 1);
    assert_eq!(stats.set_database_calls, vec!["audit", "audit"]);
    assert_eq!(session.database().as_deref(), Some("audit"));
    Ok(())
}

#[test]
fn connect_failure_leaves_session_disconnected() {
    let driver = mysql_driver().with_connect_error("host unreachable");
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);

    let result = session.get_connection();

    assert!(matches!(result, Err(DbError::ConnectionFailed(_))));
    assert_eq!(session.state(), SessionState::Disconnected);

    driver.set_connect_error(None);
    assert!(session.get_connection().is_ok());
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn authenticated_profile_requires_resolved_credentials() {
    let driver = FakeDriver::new(DbKind::Postgres);
    let session = session(
        fixtures::basic_profile("pg", DbKind::Postgres, "alice"),
        &driver,
    );

    assert!(matches!(
        session.get_connection(),
        Err(DbError::Credentials(_))
    ));
    assert_eq!(driver.stats().connect_calls, 0);
}

// ---------------------------------------------------------------------------
// Switching databases
// ---------------------------------------------------------------------------

#[test]
fn failed_switch_reverts_to_reported_database() -> Result<(), DbError> {
    let driver = mysql_driver().with_failing_database("audit");
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.get_connection()?;

    let result = session.set_database("audit");

    assert!(matches!(result, Err(DbError::QueryFailed(_))));
    assert_eq!(session.database().as_deref(), Some("app"));
    Ok(())
}

#[test]
fn failed_switch_on_dead_connection_keeps_requested_database() -> Result<(), DbError> {
    let driver = mysql_driver().with_fatal_database("audit");
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.get_connection()?;

    session.set_database("audit")?;

    assert_eq!(session.database().as_deref(), Some("audit"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Abort, reconnect and close
// ---------------------------------------------------------------------------

#[test]
fn abort_cancels_statement_on_live_connection() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.get_connection()?;

    session.abort();

    assert!(session.is_aborted());
    assert_eq!(session.state(), SessionState::Aborting);
    assert_eq!(driver.stats().cancel_active_calls, 1);
    Ok(())
}

#[test]
fn abort_without_connection_only_sets_flag() {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);

    session.abort();

    assert!(session.is_aborted());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(driver.stats().cancel_active_calls, 0);
}

#[test]
fn reconnect_replaces_connection() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.set_database("audit")?;

    session.reconnect()?;

    let stats = driver.stats();
    assert_eq!(stats.connect_calls, 2);
    assert_eq!(stats.close_calls, 1);
    assert_eq!(session.database().as_deref(), Some("audit"));
    Ok(())
}

#[test]
fn close_rolls_back_and_swallows_errors() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.get_connection()?;
    driver.kill_connections();

    session.close();

    let stats = driver.stats();
    assert_eq!(stats.rollback_calls, 1);
    assert_eq!(stats.close_calls, 1);
    assert_eq!(session.state(), SessionState::Disconnected);

    session.close();
    assert_eq!(driver.stats().close_calls, 1);
    Ok(())
}

#[test]
fn closed_session_never_reconnects() -> Result<(), DbError> {
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver);
    session.get_connection()?;

    session.close();

    assert!(session.is_closed());
    assert!(matches!(
        session.get_connection(),
        Err(DbError::ConnectionLost(_))
    ));
    assert!(matches!(
        CatalogCrawler::crawl(&session, "app"),
        Err(DbError::ConnectionLost(_))
    ));
    assert_eq!(driver.stats().connect_calls, 1);
    assert_eq!(session.state(), SessionState::Disconnected);
    Ok(())
}

fn wait_for_state(session: &QuerySession, state: SessionState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.state() != state {
        assert!(Instant::now() < deadline, "session never reached {:?}", state);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn close_during_connect_discards_the_new_connection() {
    let driver = mysql_driver().with_connect_delay(Duration::from_millis(300));
    let session = Arc::new(session(fixtures::profile("my", DbKind::MySql), &driver));

    let connecting = {
        let session = session.clone();
        thread::spawn(move || session.get_connection().map(|_| ()))
    };
    wait_for_state(&session, SessionState::Connecting);
    session.close();

    let result = connecting.join().unwrap();

    assert!(matches!(result, Err(DbError::ConnectionLost(_))));
    assert_eq!(driver.stats().close_calls, 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn abort_and_state_do_not_wait_for_a_slow_connect() {
    let driver = mysql_driver().with_connect_delay(Duration::from_millis(600));
    let session = Arc::new(session(fixtures::profile("my", DbKind::MySql), &driver));

    let connecting = {
        let session = session.clone();
        thread::spawn(move || session.get_connection().map(|_| ()))
    };
    wait_for_state(&session, SessionState::Connecting);

    let started = Instant::now();
    session.abort();
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(session.database(), None);
    assert!(started.elapsed() < Duration::from_millis(200));

    assert!(connecting.join().unwrap().is_ok());
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn stale_connection_is_closed_on_the_pool() -> Result<(), DbError> {
    let pool = Arc::new(WorkerPool::new(1)?);
    let driver = mysql_driver();
    let session = session(fixtures::profile("my", DbKind::MySql), &driver).with_pool(pool.clone());
    session.get_connection()?;
    driver.kill_connections();

    session.get_connection()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while driver.stats().close_calls == 0 {
        assert!(Instant::now() < deadline, "stale connection was never closed");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(driver.stats().connect_calls, 2);
    pool.shutdown(Duration::from_secs(1));
    Ok(())
}

#[test]
fn updated_profile_is_used_by_the_next_connect() -> Result<(), DbError> {
    let driver = mysql_driver();
    let profile = fixtures::profile("my", DbKind::MySql);
    let session = session(profile.clone(), &driver);

    session.update_profile(profile.clone().with_default_database("audit"));
    session.get_connection()?;
    assert_eq!(session.database().as_deref(), Some("audit"));

    let other = fixtures::profile("other", DbKind::MySql);
    session.update_profile(other);
    assert_eq!(session.profile().id, profile.id);
    Ok(())
}
