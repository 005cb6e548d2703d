use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use ulid::Ulid;

use kuota::tenant::TenantManager;
use kuota::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("kuota_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, 5));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "kuota".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let conn_str = format!(
        "host={} port={} dbname={} user=kuota password=kuota",
        addr.ip(),
        addr.port(),
        dbname
    );
    let (client, connection) = tokio_postgres::connect(&conn_str, NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Only the data rows of a simple query, as (column → text) accessors.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn submit(
    client: &tokio_postgres::Client,
    group: &str,
    date: &str,
    days: i64,
) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, group_name, start_date, duration_days) VALUES ('{id}', '{group}', '{date}', {days})"
        ))
        .await
        .unwrap();
    id
}

async fn approve(client: &tokio_postgres::Client, id: Ulid) {
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'approved' WHERE id = '{id}'"
        ))
        .await
        .unwrap();
}

async fn availability_row(
    client: &tokio_postgres::Client,
    group: &str,
    date: &str,
    days: i64,
) -> (String, Option<String>) {
    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE group_name = '{group}' AND start_date = '{date}' AND duration_days = {days}"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    (
        rows[0].get("available").unwrap().to_string(),
        rows[0].get("blocked_date").map(|s| s.to_string()),
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn submit_and_list_bookings() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_submit_list").await;

    let id = submit(&client, "LabA", "2025-03-10", 30).await;

    let rows = data_rows(
        client
            .simple_query("SELECT * FROM bookings WHERE group_name = 'LabA'")
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(id.to_string().as_str()));
    assert_eq!(rows[0].get("start_date"), Some("2025-03-10"));
    assert_eq!(rows[0].get("duration_days"), Some("30"));
    assert_eq!(rows[0].get("status"), Some("pending"));
    assert_eq!(rows[0].get("label"), None);
}

#[tokio::test]
async fn availability_verdict_on_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_verdict").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let id = submit(&client, "RoomX", "2025-06-01", 1).await;
    approve(&client, id).await;

    let (available, blocked_date) = availability_row(&client, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "false");
    assert_eq!(blocked_date.as_deref(), Some("2025-06-01"));

    let (available, blocked_date) = availability_row(&client, "RoomX", "2025-06-02", 1).await;
    assert_eq!(available, "true");
    assert_eq!(blocked_date, None);
}

#[tokio::test]
async fn pending_submissions_reserve_nothing() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_pending").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    submit(&client, "RoomX", "2025-06-01", 1).await;

    let (available, _) = availability_row(&client, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "true");
}

#[tokio::test]
async fn full_day_submission_names_the_date() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_full_day").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let id = submit(&client, "RoomX", "2025-06-01", 1).await;
    approve(&client, id).await;

    let other = Ulid::new();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, group_name, start_date, duration_days) VALUES ('{other}', 'RoomX', '2025-05-30', 5)"
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("expected a db error");
    assert_eq!(db.code(), &SqlState::RAISE_EXCEPTION);
    assert!(db.message().contains("RoomX"));
    assert!(db.message().contains("2025-06-01"));
}

#[tokio::test]
async fn second_approval_is_refused() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_second_approval").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let first = submit(&client, "RoomX", "2025-06-01", 1).await;
    let second = submit(&client, "RoomX", "2025-06-01", 1).await;

    approve(&client, first).await;
    let err = client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'approved' WHERE id = '{second}'"
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("expected a db error");
    assert_eq!(db.code(), &SqlState::RAISE_EXCEPTION);

    // Rejecting it instead still works
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'rejected' WHERE id = '{second}'"
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn blocked_days_window_on_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_blocked_days").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let a = submit(&client, "RoomX", "2025-07-01", 2).await;
    approve(&client, a).await;
    let b = submit(&client, "RoomX", "2025-07-10", 1).await;
    approve(&client, b).await;

    let rows = data_rows(
        client
            .simple_query(
                "SELECT * FROM blocked_days WHERE group_name = 'RoomX' AND from_date = '2025-07-01' AND to_date = '2025-07-31'",
            )
            .await
            .unwrap(),
    );
    let days: Vec<&str> = rows.iter().map(|r| r.get("day").unwrap()).collect();
    assert_eq!(days, vec!["2025-07-01", "2025-07-02", "2025-07-10"]);
}

#[tokio::test]
async fn quota_override_vs_default() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_override").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('Umum', 10)")
        .await
        .unwrap();

    // Seven approved one-day bookings on the same day in each group
    for group in ["Umum", "LabA"] {
        for i in 0..7 {
            let id = Ulid::new();
            let result = client
                .batch_execute(&format!(
                    "INSERT INTO bookings (id, group_name, start_date, duration_days) VALUES ('{id}', '{group}', '2025-07-01', 1)"
                ))
                .await;
            if group == "Umum" {
                result.unwrap();
                approve(&client, id).await;
            } else if i < 5 {
                // Default quota is 5: the sixth and seventh submissions bounce
                result.unwrap();
                approve(&client, id).await;
            } else {
                assert!(result.is_err());
            }
        }
    }

    let (available, _) = availability_row(&client, "Umum", "2025-07-01", 1).await;
    assert_eq!(available, "true");
    let (available, blocked) = availability_row(&client, "LabA", "2025-07-01", 1).await;
    assert_eq!(available, "false");
    assert_eq!(blocked.as_deref(), Some("2025-07-01"));
}

#[tokio::test]
async fn groups_listing_reports_quota_source() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_groups_listing").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('Umum', 10)")
        .await
        .unwrap();
    client
        .batch_execute("UPDATE groups SET quota = 12 WHERE name = 'Umum'")
        .await
        .unwrap();
    submit(&client, "LabA", "2025-03-10", 1).await;

    let rows = data_rows(client.simple_query("SELECT * FROM groups").await.unwrap());
    assert_eq!(rows.len(), 2);
    let find = |name: &str| {
        rows.iter()
            .find(|r| r.get("name") == Some(name))
            .unwrap_or_else(|| panic!("no row for {name}"))
    };
    assert_eq!(find("Umum").get("quota"), Some("12"));
    assert_eq!(find("Umum").get("source"), Some("override"));
    assert_eq!(find("LabA").get("quota"), Some("5"));
    assert_eq!(find("LabA").get("source"), Some("default"));
}

#[tokio::test]
async fn status_filter_in_bookings_select() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_status_filter").await;

    let approved_id = submit(&client, "LabA", "2025-03-10", 1).await;
    approve(&client, approved_id).await;
    let pending_id = submit(&client, "LabA", "2025-03-11", 1).await;

    let rows = data_rows(
        client
            .simple_query(
                "SELECT * FROM bookings WHERE group_name = 'LabA' AND status = 'pending'",
            )
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(pending_id.to_string().as_str()));
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_cancel").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let id = submit(&client, "RoomX", "2025-06-01", 1).await;
    approve(&client, id).await;

    let (available, _) = availability_row(&client, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "false");

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap();

    let (available, _) = availability_row(&client, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "true");
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (addr, _tm) = start_test_server().await;
    let office_a = connect(addr, "t_office_a").await;
    let office_b = connect(addr, "t_office_b").await;

    office_a
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let id = submit(&office_a, "RoomX", "2025-06-01", 1).await;
    approve(&office_a, id).await;

    let (available, _) = availability_row(&office_a, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "false");
    let (available, _) = availability_row(&office_b, "RoomX", "2025-06-01", 1).await;
    assert_eq!(available, "true");
}

#[tokio::test]
async fn unknown_table_is_a_syntax_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_unknown_table").await;

    let err = client
        .batch_execute("SELECT * FROM nonsense")
        .await
        .unwrap_err();
    let db = err.as_db_error().expect("expected a db error");
    assert_eq!(db.code(), &SqlState::SYNTAX_ERROR);
}

#[tokio::test]
async fn extended_protocol_availability_query() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "t_extended").await;

    client
        .batch_execute("INSERT INTO groups (name, quota) VALUES ('RoomX', 1)")
        .await
        .unwrap();
    let id = submit(&client, "RoomX", "2025-06-01", 1).await;
    approve(&client, id).await;

    let rows = client
        .query(
            "SELECT * FROM availability WHERE group_name = $1 AND start_date = $2 AND duration_days = 1",
            &[&"RoomX", &"2025-06-01"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let available: &str = rows[0].get("available");
    let blocked_date: Option<&str> = rows[0].get("blocked_date");
    assert_eq!(available, "false");
    assert_eq!(blocked_date, Some("2025-06-01"));
}
