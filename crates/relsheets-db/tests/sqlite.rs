use relsheets_common::{ConstraintId, ErrorKind, TableName, TableValues, Value, ValueMap};
use relsheets_db::{
    Catalog, Executor, JoinPath, Params, SqliteBackend, available_joins, insert_rows,
    update_rows,
};
use relsheets_sql::{SafeSql, make_cast, make_order_expr};

fn shop() -> SqliteBackend {
    let mut db = SqliteBackend::open_in_memory().unwrap();
    db.attach(":memory:", "test").unwrap();
    db.connection()
        .execute_batch(
            "CREATE TABLE test.customers (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE test.orders (
                 id INTEGER PRIMARY KEY,
                 customer_id INTEGER REFERENCES customers(id),
                 note TEXT
             );
             CREATE TABLE test.products (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE test.order_products (
                 id INTEGER PRIMARY KEY,
                 order_id INTEGER REFERENCES orders(id),
                 product_id INTEGER REFERENCES products(id)
             );
             CREATE TABLE test.employees (
                 id INTEGER PRIMARY KEY,
                 name TEXT,
                 manager_id INTEGER REFERENCES employees(id)
             );
             INSERT INTO test.customers (id, name) VALUES (1, 'ann'), (2, 'bob');
             INSERT INTO test.orders (id, customer_id, note) VALUES (1, 1, 'first'), (2, 2, 'second');",
        )
        .unwrap();
    db
}

fn t(name: &str) -> TableName {
    TableName::new("test", name)
}

fn key_between(catalog: &Catalog, db: &mut SqliteBackend, source: &str, target: &str) -> ConstraintId {
    catalog
        .foreign_keys(db, &t(source))
        .unwrap()
        .iter()
        .find(|(_, f)| f.source_table == t(source) && f.target_table == t(target))
        .map(|(id, _)| *id)
        .unwrap()
}

fn count(db: &mut SqliteBackend, table: &'static str) -> String {
    let sql = match table {
        "customers" => "SELECT COUNT(*) FROM test.customers",
        "products" => "SELECT COUNT(*) FROM test.products",
        "order_products" => "SELECT COUNT(*) FROM test.order_products",
        _ => "SELECT COUNT(*) FROM test.employees",
    };
    let rows = db.query(&SafeSql::from_static(sql), &Params::None).unwrap();
    rows[0][0].clone().unwrap()
}

fn values(pairs: &[(&str, &[(&str, &str)])]) -> TableValues {
    pairs
        .iter()
        .map(|(table, cols)| {
            let row: ValueMap = cols
                .iter()
                .map(|(c, v)| (c.to_string(), Value::from_input(v)))
                .collect();
            (format!("test.{table}"), row)
        })
        .collect()
}

#[test]
fn catalog_sees_every_table() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    assert_eq!(catalog.tables().count(), 5);
    assert_eq!(catalog.primary_key(&mut db, &t("orders")).unwrap(), vec!["id"]);
    assert!(catalog.columns(&mut db, &t("nope")).is_err());
}

#[test]
fn join_path_walks_both_directions() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let to_orders = key_between(&catalog, &mut db, "orders", "customers");
    let to_lines = key_between(&catalog, &mut db, "order_products", "orders");

    let path = JoinPath::resolve(&catalog, &mut db, &t("customers"), &[to_orders, to_lines]).unwrap();
    assert_eq!(path.tables, vec![t("customers"), t("orders"), t("order_products")]);

    let select = path
        .select()
        .column(make_cast("test.customers.name", Some("text"), None).unwrap())
        .column(make_cast("test.orders.note", Some("text"), None).unwrap())
        .order_by(make_order_expr("test.customers.id", true).unwrap())
        .paginate()
        .build()
        .unwrap();
    let rows = db.query(&select, &Params::page(10, 0)).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![Some("ann".to_string()), Some("first".to_string())]);
}

#[test]
fn unknown_constraint_is_a_graph_error() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let err = JoinPath::resolve(&catalog, &mut db, &t("customers"), &[ConstraintId(-1)]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Graph);
}

#[test]
fn available_joins_skip_joined_tables() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let path = JoinPath::single(t("orders"));
    let offered = available_joins(&catalog, &mut db, &path).unwrap();
    assert_eq!(offered.len(), 2);

    let to_customers = key_between(&catalog, &mut db, "orders", "customers");
    let path = JoinPath::resolve(&catalog, &mut db, &t("orders"), &[to_customers]).unwrap();
    let offered = available_joins(&catalog, &mut db, &path).unwrap();
    assert_eq!(offered.len(), 1);
    assert_eq!(offered[0].1.source_table, t("order_products"));
}

#[test]
fn inserts_follow_foreign_keys() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let to_products = key_between(&catalog, &mut db, "order_products", "products");
    let to_orders = key_between(&catalog, &mut db, "order_products", "orders");
    let path =
        JoinPath::resolve(&catalog, &mut db, &t("order_products"), &[to_products, to_orders]).unwrap();

    let input = values(&[
        ("order_products", &[("id", "10")]),
        ("products", &[("name", "widget")]),
    ]);
    let references = values(&[("orders", &[("id", "2")])]);

    let outcome = insert_rows(&mut db, &path.joins, &input, &references).unwrap();
    assert_eq!(outcome.order, vec![t("products"), t("order_products")]);
    let product_id = outcome.returned[&t("products")]["id"].clone();

    let rows = db
        .query(
            &SafeSql::from_static(
                "SELECT CAST(order_id AS text), CAST(product_id AS text) FROM test.order_products WHERE id = 10",
            ),
            &Params::None,
        )
        .unwrap();
    assert_eq!(rows[0][0].as_deref(), Some("2"));
    assert_eq!(rows[0][1].as_deref(), product_id.as_text());
}

#[test]
fn cycles_insert_nothing() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let joins: Vec<_> = catalog
        .foreign_keys(&mut db, &t("employees"))
        .unwrap()
        .values()
        .cloned()
        .collect();
    let input = values(&[("employees", &[("name", "eve")])]);
    let err = insert_rows(&mut db, &joins, &input, &TableValues::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Graph);
    assert_eq!(count(&mut db, "employees"), "0");
}

#[test]
fn failing_insert_rolls_back_earlier_tables() {
    let mut db = shop();
    let catalog = Catalog::load(&mut db).unwrap();
    let id = key_between(&catalog, &mut db, "order_products", "products");
    let fkey = catalog
        .foreign_key(&mut db, &t("order_products"), id)
        .unwrap()
        .unwrap()
        .clone();
    // order_id 99 violates the orders key once products has been written
    let input = values(&[
        ("products", &[("name", "gadget")]),
        ("order_products", &[("order_id", "99")]),
    ]);
    assert!(insert_rows(&mut db, &[fkey], &input, &TableValues::new()).is_err());
    assert_eq!(count(&mut db, "products"), "0");
    assert_eq!(count(&mut db, "order_products"), "0");
}

#[test]
fn empty_input_is_rejected() {
    let mut db = shop();
    let input = values(&[("customers", &[("name", "")])]);
    let err = insert_rows(&mut db, &[], &input, &TableValues::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Write);
}

#[test]
fn updates_write_empty_as_null() {
    let mut db = shop();
    let input = values(&[("customers", &[("id", "1"), ("name", "")])]);
    let keys = values(&[("customers", &[("id", "1")])]);
    assert_eq!(update_rows(&mut db, &input, &keys).unwrap(), 1);
    let rows = db
        .query(
            &SafeSql::from_static("SELECT name FROM test.customers WHERE id = 1"),
            &Params::None,
        )
        .unwrap();
    assert_eq!(rows, vec![vec![None]]);

    let err = update_rows(&mut db, &input, &TableValues::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Write);
}
