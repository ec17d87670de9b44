use std::sync::Arc;

use dabo::{Bizobj, BusinessRules, Connection, ConnectionInfo, Error, FieldSpecCatalog, Value};

const FIELDSPEC: &str = r#"
<tables>
  <table name="customer">
    <field name="pkid" type="I" pk="true"/>
    <field name="company" type="C"/>
  </table>
  <table name="orders">
    <field name="pkid" type="I" pk="true"/>
    <field name="cust_fk" type="I"/>
    <field name="to_name" type="C"/>
  </table>
</tables>"#;

async fn open_shop() -> Result<(Connection, Arc<FieldSpecCatalog>), Box<dyn std::error::Error>> {
    let info = ConnectionInfo::new("SQLite", "local", "app", "", ":memory:", None);
    let conn = Connection::open(&info)?;
    conn.execute("CREATE TABLE customer (pkid INTEGER PRIMARY KEY AUTOINCREMENT, company TEXT)")
        .await?;
    conn.execute(
        "CREATE TABLE orders (pkid INTEGER PRIMARY KEY AUTOINCREMENT, cust_fk INTEGER, to_name TEXT)",
    )
    .await?;
    let specs = Arc::new(FieldSpecCatalog::parse(FIELDSPEC, "shop.fsxml")?);
    Ok((conn, specs))
}

fn customer_tree(conn: &Connection, specs: &Arc<FieldSpecCatalog>) -> Bizobj {
    let mut parent = Bizobj::new(conn.clone(), "customer", "pkid");
    parent.set_field_specs(Arc::clone(specs));
    let mut orders = Bizobj::new(conn.clone(), "orders", "pkid");
    orders.set_field_specs(Arc::clone(specs));
    orders.set_link_field("cust_fk");
    parent.add_child(orders).unwrap();
    parent
}

#[tokio::test]
async fn children_follow_the_parent_pointer() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (1, 'Acme')").await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (2, 'Initech')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (1, 'Alice')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (1, 'Bob')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (2, 'Carol')").await?;

    let mut parent = customer_tree(&conn, &specs);
    parent.requery().await?;

    let pk = parent.get_field_value("pkid")?;
    assert_eq!(parent.child(0).unwrap().row_count(), 2);
    for row in parent.child(0).unwrap().records() {
        assert_eq!(row.value("cust_fk")?, &pk);
    }

    parent.next().await?;
    let pk = parent.get_field_value("pkid")?;
    assert_eq!(parent.child(0).unwrap().row_count(), 1);
    for row in parent.child(0).unwrap().records() {
        assert_eq!(row.value("cust_fk")?, &pk);
    }
    Ok(())
}

#[tokio::test]
async fn cascade_delete_removes_children_first_in_one_save()
-> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (7, 'Acme')").await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (8, 'Initech')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (7, 'Alice')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (7, 'Bob')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (8, 'Carol')").await?;

    let mut parent = customer_tree(&conn, &specs);
    parent.requery().await?;
    assert_eq!(parent.get_field_value("pkid")?, Value::Int(7));

    parent.delete().await?;
    conn.clear_statement_log();
    parent.save().await?;

    let deletes: Vec<String> = conn
        .statement_log()
        .into_iter()
        .filter(|s| s.starts_with("DELETE"))
        .collect();
    assert_eq!(deletes.len(), 3);
    // Both order deletes come before the customer delete.
    assert!(deletes[0].starts_with("DELETE FROM orders"));
    assert!(deletes[1].starts_with("DELETE FROM orders"));
    assert_eq!(deletes[2], "DELETE FROM customer WHERE pkid = 7");

    // Customer 8 and its order are untouched.
    let (_, rows) = conn.fetch("SELECT cust_fk FROM orders").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::Int(8));
    let (_, rows) = conn.fetch("SELECT pkid FROM customer").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::Int(8));
    Ok(())
}

struct RefuseSave;

#[async_trait::async_trait]
impl BusinessRules for RefuseSave {
    async fn before_save(&self, _biz: &Bizobj) -> Result<(), Error> {
        Err(Error::BusinessRuleViolation("saves are closed today".into()))
    }
}

#[tokio::test]
async fn refused_save_rolls_the_cascade_back() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (7, 'Acme')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (7, 'Alice')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (7, 'Bob')").await?;

    let mut parent = customer_tree(&conn, &specs);
    parent.set_hooks(Arc::new(RefuseSave));
    parent.requery().await?;
    parent.delete().await?;

    assert!(matches!(
        parent.save().await,
        Err(Error::BusinessRuleViolation(_))
    ));

    // The transaction rolled back: every row is still there, and the
    // pending deletes survive for a retry or cancel.
    let (_, rows) = conn.fetch("SELECT pkid FROM orders").await?;
    assert_eq!(rows.len(), 2);
    let (_, rows) = conn.fetch("SELECT pkid FROM customer").await?;
    assert_eq!(rows.len(), 1);
    assert!(parent.is_any_dirty());
    Ok(())
}

#[tokio::test]
async fn new_parent_key_reaches_the_new_child_before_its_insert()
-> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    let mut parent = customer_tree(&conn, &specs);
    parent.requery().await?;

    parent.new_row().await?;
    let child = parent.child_mut(0).unwrap();
    child.new_row().await?;
    child.set_field_value("to_name", "X")?;
    parent.set_field_value("company", "Y")?;

    conn.clear_statement_log();
    parent.save().await?;

    let inserts: Vec<String> = conn
        .statement_log()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts.len(), 2);
    assert_eq!(inserts[0], "INSERT INTO customer (company) VALUES ('Y')");
    assert_eq!(inserts[1], "INSERT INTO orders (cust_fk, to_name) VALUES (1, 'X')");

    // The minted identity landed on both sides of the link.
    assert_eq!(parent.get_field_value("pkid")?, Value::Int(1));
    assert_eq!(
        parent.child(0).unwrap().records().current()?.value("cust_fk")?,
        &Value::Int(1)
    );

    let (_, rows) = conn.fetch("SELECT cust_fk, to_name FROM orders").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::Int(1));
    assert_eq!(rows[0][1], Value::Text("X".into()));
    Ok(())
}

#[tokio::test]
async fn retry_after_rollback_restamps_the_child_link() -> Result<(), Box<dyn std::error::Error>> {
    // Same shape as open_shop, but to_name refuses NULL so the first save
    // can be made to fail on the child INSERT.
    let info = ConnectionInfo::new("SQLite", "local", "app", "", ":memory:", None);
    let conn = Connection::open(&info)?;
    conn.execute("CREATE TABLE customer (pkid INTEGER PRIMARY KEY AUTOINCREMENT, company TEXT)")
        .await?;
    conn.execute(
        "CREATE TABLE orders (pkid INTEGER PRIMARY KEY AUTOINCREMENT, cust_fk INTEGER, to_name TEXT NOT NULL)",
    )
    .await?;
    let specs = Arc::new(FieldSpecCatalog::parse(FIELDSPEC, "shop.fsxml")?);

    let mut parent = customer_tree(&conn, &specs);
    parent.requery().await?;
    parent.new_row().await?;
    parent.set_field_value("company", "Y")?;
    parent.child_mut(0).unwrap().new_row().await?;

    // to_name is still NULL: the child INSERT violates the constraint and
    // the whole transaction rolls back, taking the parent's key with it.
    assert!(parent.save().await.is_err());
    assert!(parent.get_field_value("pkid")?.is_null());

    // Someone else claims the identity the rolled-back INSERT had minted.
    conn.execute("INSERT INTO customer (company) VALUES ('Interloper')")
        .await?;

    parent
        .child_mut(0)
        .unwrap()
        .set_field_value("to_name", "X")?;
    parent.save().await?;

    // The retry's key, not the discarded one, reaches the child.
    let pk = parent.get_field_value("pkid")?;
    assert_eq!(pk, Value::Int(2));
    assert_eq!(
        parent.child(0).unwrap().records().current()?.value("cust_fk")?,
        &pk
    );
    let (_, rows) = conn.fetch("SELECT cust_fk FROM orders").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::Int(2));
    Ok(())
}

#[tokio::test]
async fn unsaved_parent_gives_the_child_an_empty_set() -> Result<(), Box<dyn std::error::Error>> {
    let (conn, specs) = open_shop().await?;
    conn.execute("INSERT INTO customer (pkid, company) VALUES (1, 'Acme')").await?;
    conn.execute("INSERT INTO orders (cust_fk, to_name) VALUES (1, 'Alice')").await?;

    let mut parent = customer_tree(&conn, &specs);
    parent.requery().await?;
    assert_eq!(parent.child(0).unwrap().row_count(), 1);

    // A brand-new parent row matches no child rows in the database.
    parent.new_row().await?;
    assert_eq!(parent.child(0).unwrap().row_count(), 0);

    // Navigating back restores the link filter.
    parent.first().await?;
    assert_eq!(parent.child(0).unwrap().row_count(), 1);
    Ok(())
}
