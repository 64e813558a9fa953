use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction. Keeps restart replay bounded by
/// live state instead of total history.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRange, Party};
    use crate::notify::NotifyHub;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("motorpool_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn spec() -> crate::model::VehicleSpec {
        crate::model::VehicleSpec {
            vehicle_type: "Sedan".into(),
            brand: "Honda".into(),
            model: "Civic".into(),
            year: 2020,
            price_per_day: Decimal::new(4500, 2),
            features: vec![],
            fuel_type: "Petrol".into(),
            transmission: "Manual".into(),
            seating_capacity: 5,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn compaction_counter_resets() {
        let path = test_wal_path("counter_resets.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let vid = Ulid::new();
        engine
            .add_vehicle(vid, "Civic".into(), spec(), 3)
            .await
            .unwrap();
        for _ in 0..5 {
            let bid = Ulid::new();
            engine
                .create_booking(
                    bid,
                    vid,
                    Party { id: Ulid::new(), name: "Ada".into() },
                    Party { id: Ulid::new(), name: "Airport".into() },
                    DateRange::new(
                        "2024-06-01".parse().unwrap(),
                        "2024-06-03".parse().unwrap(),
                    ),
                    Decimal::new(13500, 2),
                )
                .await
                .unwrap();
            engine.delete_booking(bid).await.unwrap();
        }
        assert!(engine.wal_appends_since_compact().await >= 11);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
