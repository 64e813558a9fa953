//! Contended-booking stress driver. Run against a live server:
//!
//!   MOTORPOOL_PORT=5434 cargo run --release &
//!   cargo bench --bench stress

use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16, tenant: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(tenant)
        .user("motorpool")
        .password("motorpool");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn setup_vehicle(client: &tokio_postgres::Client, stock: u32) -> Ulid {
    let vid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, name, type, brand, model, year, price_per_day, \
             features, fuel_type, transmission, seating_capacity, image_url, total_stock) \
             VALUES ('{vid}', 'Stress Sedan', 'Sedan', 'Generic', 'S1', 2024, 50.00, \
             NULL, 'Petrol', 'Manual', 5, NULL, {stock})"
        ))
        .await
        .unwrap();
    vid
}

fn booking_sql(vid: Ulid, day_offset: u32) -> String {
    let bid = Ulid::new();
    let start = 1 + (day_offset % 27);
    format!(
        "INSERT INTO bookings (id, customer_id, customer_name, vehicle_id, branch_id, \
         branch_name, start_date, end_date, total_amount) \
         VALUES ('{bid}', '{}', 'Load Tester', '{vid}', '{}', 'Bench', \
         '2030-06-{start:02}', '2030-06-{:02}', 100.00)",
        Ulid::new(),
        Ulid::new(),
        start + 1,
    )
}

/// Phase 1: sequential create/reject cycles on one vehicle, measuring
/// round-trip latency of the mutation path (WAL fsync included).
async fn phase1_sequential(host: &str, port: u16, tenant: &str) {
    let client = connect(host, port, tenant).await;
    let vid = setup_vehicle(&client, 1).await;

    let mut create_lat = Vec::new();
    let mut decide_lat = Vec::new();

    for i in 0..200u32 {
        let bid = Ulid::new();
        let sql = format!(
            "INSERT INTO bookings (id, customer_id, customer_name, vehicle_id, branch_id, \
             branch_name, start_date, end_date, total_amount) \
             VALUES ('{bid}', '{}', 'Load Tester', '{vid}', '{}', 'Bench', \
             '2030-06-01', '2030-06-05', 100.00)",
            Ulid::new(),
            Ulid::new(),
        );
        let t = Instant::now();
        client.batch_execute(&sql).await.unwrap();
        create_lat.push(t.elapsed());

        let t = Instant::now();
        client
            .batch_execute(&format!(
                "UPDATE bookings SET status = 'rejected' WHERE id = '{bid}'"
            ))
            .await
            .unwrap();
        decide_lat.push(t.elapsed());

        if i % 50 == 0 {
            client
                .batch_execute(&format!("DELETE FROM bookings WHERE id = '{bid}'"))
                .await
                .unwrap();
        }
    }

    print_latency("create booking (sequential)", &mut create_lat);
    print_latency("reject booking (sequential)", &mut decide_lat);
}

/// Phase 2: N workers hammering one vehicle with `stock` units. Exactly
/// `stock` creations must win; the rest must fail with NO_AVAILABILITY.
async fn phase2_contention(host: &str, port: u16, tenant: &str) {
    let client = connect(host, port, tenant).await;
    let stock = 10u32;
    let workers = 64usize;
    let vid = setup_vehicle(&client, stock).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for w in 0..workers {
        let host = host.to_string();
        let tenant = tenant.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant).await;
            let t = Instant::now();
            let result = client.batch_execute(&booking_sql(vid, w as u32)).await;
            (result.is_ok(), t.elapsed())
        }));
    }

    let mut wins = 0usize;
    let mut latencies = Vec::new();
    for h in handles {
        let (ok, lat) = h.await.unwrap();
        if ok {
            wins += 1;
        }
        latencies.push(lat);
    }

    println!(
        "  contention: {workers} workers, stock {stock}: {wins} wins in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(wins, stock as usize, "overcommitted the fleet!");
    print_latency("create booking (contended)", &mut latencies);
}

/// Phase 3: read throughput on the availability row while bookings churn.
async fn phase3_reads(host: &str, port: u16, tenant: &str) {
    let client = connect(host, port, tenant).await;
    let vid = setup_vehicle(&client, 100).await;

    let mut read_lat = Vec::new();
    for _ in 0..500 {
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE vehicle_id = '{vid}'"
            ))
            .await
            .unwrap();
        read_lat.push(t.elapsed());
    }
    print_latency("availability read", &mut read_lat);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("MOTORPOOL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("MOTORPOOL_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5434);
    let tenant = format!("bench_{}", Ulid::new());

    println!("motorpool stress against {host}:{port} (tenant {tenant})");

    println!("phase 1: sequential mutation latency");
    phase1_sequential(&host, port, &tenant).await;

    println!("phase 2: contended bookings on a shared vehicle");
    phase2_contention(&host, port, &tenant).await;

    println!("phase 3: availability reads");
    phase3_reads(&host, port, &tenant).await;
}
