use std::sync::{Arc, Mutex};

use dabo::{BizEvent, Bizobj, Connection, ConnectionInfo, Value};

async fn open_customers() -> Result<Connection, Box<dyn std::error::Error>> {
    let info = ConnectionInfo::new("SQLite", "local", "app", "", ":memory:", None);
    let conn = Connection::open(&info)?;
    conn.execute(
        "CREATE TABLE customer (pkid INTEGER PRIMARY KEY AUTOINCREMENT, company TEXT, phone TEXT)",
    )
    .await?;
    conn.execute("INSERT INTO customer (company, phone) VALUES ('Acme', '555')")
        .await?;
    Ok(conn)
}

#[tokio::test]
async fn cancel_reverts_every_edit_without_sql() -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_customers().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.requery().await?;

    biz.set_field_value("company", "Initech")?;
    biz.set_field_value("phone", "999")?;
    assert!(biz.is_dirty());

    conn.clear_statement_log();
    biz.cancel()?;

    assert!(conn.statement_log().is_empty());
    assert!(!biz.is_dirty());
    assert_eq!(biz.get_field_value("company")?, Value::Text("Acme".into()));
    assert_eq!(biz.get_field_value("phone")?, Value::Text("555".into()));
    Ok(())
}

#[tokio::test]
async fn cancel_drops_new_rows_and_pending_deletes() -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_customers().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.requery().await?;

    // Mark the loaded row for deletion, then add a new one.
    biz.delete().await?;
    biz.new_row().await?;
    assert!(biz.is_any_dirty());

    biz.cancel()?;
    assert!(!biz.is_any_dirty());

    // Nothing pending: a save issues no statements and the database row
    // survives.
    conn.clear_statement_log();
    biz.save().await?;
    assert!(conn.statement_log().is_empty());

    biz.requery().await?;
    assert_eq!(biz.row_count(), 1);
    assert_eq!(biz.get_field_value("company")?, Value::Text("Acme".into()));
    Ok(())
}

#[tokio::test]
async fn edits_and_navigation_notify_subscribers() -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_customers().await?;
    conn.execute("INSERT INTO customer (company, phone) VALUES ('Initech', '777')")
        .await?;

    let mut biz = Bizobj::new(conn, "customer", "pkid");
    let seen: Arc<Mutex<Vec<BizEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    biz.subscribe(Box::new(move |event| {
        sink.lock().unwrap().push(event.clone());
    }));

    biz.requery().await?;
    biz.next().await?;
    biz.set_field_value("phone", "888")?;

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            BizEvent::RowChanged { row: 0 },
            BizEvent::RowChanged { row: 1 },
            BizEvent::ValueChanged {
                row: 1,
                field: "phone".to_string()
            },
        ]
    );
    Ok(())
}
