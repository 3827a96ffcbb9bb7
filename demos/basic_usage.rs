//! Basic usage example for rowline.
//!
//! This example demonstrates how to:
//! - Create a pooled session over a SQLite database file
//! - Execute statements with positional parameters
//! - Collect rows eagerly and stream them lazily
//! - Use an explicit connection for a transaction
//!
//! Run with:
//! ```bash
//! RUST_LOG=rowline=debug cargo run --example basic_usage
//! ```

use rowline::{
    params, LoggingController, Session, SessionConfig, SqliteParams, SqliteProvider,
    StatementSpec,
};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("rowline Basic Usage Example");
    println!("===========================\n");

    let dir = tempfile::tempdir()?;
    let params = SqliteParams::builder()
        .path(&dir.path().join("demo.db").to_string_lossy())
        .build()?;
    println!("Database: {}", params);

    let session = Session::builder()
        .provider(SqliteProvider::new(params))
        .controller(Arc::new(LoggingController::new()))
        .config(SessionConfig::default())
        .build()?;

    // Every call below acquires its own connection and closes it afterwards.
    session.execute("create table test (x int, s varchar(50))")?;
    for (x, s) in [(100, "a"), (200, "b"), (300, "a")] {
        session.execute(("insert into test (x, s) values (?, ?)", params![x, s]))?;
    }

    let sums = session.list(
        ("select sum(x) from test where s = ?", params!["a"]),
        |row| row.opt_i64(1),
    )?;
    println!("sum(x) where s = 'a': {:?}", sums.first());

    println!("\nStreaming rows:");
    for row in session.stream("select x, s from test order by x", |row| {
        Ok(Some((row.get_i64(1)?, row.get_string(2)?)))
    })? {
        let (x, s) = row?;
        println!("  x = {}, s = {:?}", x, s);
    }

    let first = session
        .stream("select x from test order by x desc", |row| row.opt_i64(1))?
        .next()
        .transpose()?;
    println!("\nLargest x (stream abandoned after one row): {:?}", first);
    println!(
        "Open connections: {}, open streams: {}",
        session.count_open_connections(),
        session.count_open_streams()
    );

    println!("\nTransaction with a savepoint:");
    let connection = session.connection()?;
    let savepoint = connection.set_savepoint()?;
    connection.execute(("insert into test values (?, ?)", params![400, "c"]))?;
    connection.rollback_to(Some(&savepoint))?;
    connection.commit()?;
    connection.close()?;

    let count = session.list("select count(*) from test", |row| row.opt_i64(1))?;
    println!("Rows after rollback to savepoint: {:?}", count.first());

    let spec = StatementSpec::new("select * from test where x = ? and s = ?", params![100, "a"]);
    println!("\nFormatted for logging: {}", session.format(&spec).sql());

    session.execute("drop table test")?;
    session.close()?;
    println!("\nDone.");

    Ok(())
}
