use std::sync::Arc;

use dabo::{Bizobj, Connection, ConnectionInfo, Error, FieldSpecCatalog, Value};

const FIELDSPEC: &str = r#"
<tables>
  <table name="customer">
    <field name="pkid" type="I" pk="true"/>
    <field name="company" type="C"/>
    <field name="phone" type="C"/>
  </table>
</tables>"#;

async fn open_shop() -> Result<(Connection, Arc<FieldSpecCatalog>), Box<dyn std::error::Error>> {
    let info = ConnectionInfo::new("SQLite", "local", "app", "", ":memory:", None);
    let conn = Connection::open(&info)?;
    conn.execute(
        "CREATE TABLE customer (pkid INTEGER PRIMARY KEY AUTOINCREMENT, company TEXT, phone TEXT)",
    )
    .await?;
    let specs = Arc::new(FieldSpecCatalog::parse(FIELDSPEC, "shop.fsxml")?);
    Ok((conn, specs))
}

#[tokio::test]
async fn new_row_save_and_reload() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);

    biz.new_row().await?;
    biz.set_field_value("company", "Acme")?;
    biz.save().await?;

    // The freshly minted identity lands in the key field.
    let pk = biz.get_field_value("pkid")?;
    assert_eq!(pk, Value::Int(1));

    biz.requery().await?;
    assert_eq!(biz.row_count(), 1);
    assert_eq!(biz.get_field_value("company")?, Value::Text("Acme".into()));
    assert_eq!(biz.get_field_value("pkid")?, pk);
    Ok(())
}

#[tokio::test]
async fn update_touches_only_the_dirty_column() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (company, phone) VALUES ('Acme', '555')")
        .await?;

    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);
    biz.requery().await?;
    biz.set_field_value("phone", "999")?;

    conn.clear_statement_log();
    biz.save().await?;

    let log = conn.statement_log();
    assert_eq!(
        log,
        vec!["UPDATE customer SET phone = '999' WHERE pkid = 1".to_string()]
    );

    // The written value is the new original.
    assert!(!biz.is_dirty());
    assert_eq!(biz.get_field_value("phone")?, Value::Text("999".into()));
    assert_eq!(biz.get_field_value("company")?, Value::Text("Acme".into()));
    Ok(())
}

#[tokio::test]
async fn clean_save_issues_no_statements() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (company, phone) VALUES ('Acme', '555')")
        .await?;

    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);
    biz.requery().await?;

    conn.clear_statement_log();
    biz.save().await?;
    assert!(conn.statement_log().is_empty());
    Ok(())
}

#[tokio::test]
async fn stale_key_surfaces_row_not_found_and_keeps_the_change_log()
-> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (company, phone) VALUES ('Acme', '555')")
        .await?;

    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);
    biz.requery().await?;
    biz.set_field_value("phone", "999")?;

    // Someone else removed the row since our requery.
    conn.execute("DELETE FROM customer").await?;

    assert!(matches!(biz.save().await, Err(Error::RowNotFound(_))));
    // The edit is still there for a retry or cancel.
    assert!(biz.is_dirty());
    Ok(())
}

#[tokio::test]
async fn deleted_new_row_never_reaches_the_database() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);

    biz.new_row().await?;
    biz.set_field_value("company", "Ephemeral")?;
    biz.delete().await?;

    conn.clear_statement_log();
    biz.save().await?;
    assert!(conn.statement_log().is_empty());

    biz.requery().await?;
    assert_eq!(biz.row_count(), 0);
    Ok(())
}

#[tokio::test]
async fn quotes_in_character_values_are_escaped() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);

    biz.new_row().await?;
    biz.set_field_value("company", "O'Brien & Sons")?;
    biz.save().await?;

    biz.requery().await?;
    assert_eq!(
        biz.get_field_value("company")?,
        Value::Text("O'Brien & Sons".into())
    );
    Ok(())
}

#[tokio::test]
async fn default_values_populate_new_rows_but_stay_out_of_the_insert()
-> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    let mut biz = Bizobj::new(conn.clone(), "customer", "pkid");
    biz.set_field_specs(specs);
    biz.set_default_value("phone", "000");

    biz.new_row().await?;
    assert_eq!(biz.get_field_value("phone")?, Value::Text("000".into()));
    biz.set_field_value("company", "Acme")?;

    conn.clear_statement_log();
    biz.save().await?;
    let inserts: Vec<String> = conn
        .statement_log()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(
        inserts,
        vec!["INSERT INTO customer (company) VALUES ('Acme')".to_string()]
    );
    Ok(())
}
