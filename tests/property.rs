// tests/property.rs
use proptest::prelude::*;
use shelfwatch::demo::{DemoGenerator, OVERHEAT, OVERTEMP};
use shelfwatch::telemetry::{decode_line, Inbound};
use shelfwatch::config::DemoConfig;
use shelfwatch::*;

proptest! {
    #[test]
    fn test_history_keeps_newest_samples(
        capacity in 1usize..20,
        samples in prop::collection::vec(-50.0f64..200.0, 0..60)
    ) {
        let mut store = ShelfStore::new(1, capacity, ShelfDefaults::default());
        for t in &samples {
            store.apply_sample(0, *t).unwrap();
        }

        let kept = samples.len().min(capacity);
        let expected = samples[samples.len() - kept..].to_vec();
        prop_assert_eq!(store.get(0).unwrap().history(), expected);
        prop_assert_eq!(store.get(0).unwrap().latest_temperature, samples.last().copied());
    }

    #[test]
    fn test_raise_is_idempotent(
        shelf in 0usize..4,
        descriptions in prop::collection::vec("[a-z ]{0,12}", 1..10)
    ) {
        let mut registry = AlarmRegistry::new();
        let mut log = EventLog::new(100);

        let created: Vec<bool> = descriptions
            .iter()
            .map(|d| registry.raise(Severity::Error, shelf, "OVERTEMP", d, false, &mut log))
            .collect();

        prop_assert!(created[0]);
        prop_assert!(created[1..].iter().all(|c| !c));
        prop_assert_eq!(registry.active_count(), 1);
        let alarm = registry.get(&Severity::Error, shelf, "OVERTEMP").unwrap();
        prop_assert_eq!(&alarm.description, &descriptions[0]);
        prop_assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_demo_never_holds_overheat_and_overtemp(
        seed in any::<u64>(),
        starts in prop::collection::vec(60.0f64..100.0, 1..5),
        ticks in 1usize..40
    ) {
        let mut config = Config::default();
        config.shelves.count = starts.len();
        let mut state = MonitorState::new(&config);
        for (i, t) in starts.iter().enumerate() {
            state.shelves.apply_sample(i, *t).unwrap();
        }

        // Wide walk so shelves cross both thresholds in both directions.
        let mut generator = DemoGenerator::new(DemoConfig {
            rise_min: -4.0,
            rise_max: 4.0,
            seed: Some(seed),
            ..DemoConfig::default()
        });

        for _ in 0..ticks {
            generator.step(&mut state);
            for i in 0..state.shelves.count() {
                let overheat = state.alarms.get(&Severity::Critical, i, OVERHEAT).is_some();
                let overtemp = state.alarms.get(&Severity::Error, i, OVERTEMP).is_some();
                prop_assert!(!(overheat && overtemp), "shelf {} holds both", i);
            }
        }
    }

    #[test]
    fn test_remaining_life_never_negative(
        life in 0.0f64..5000.0,
        increments in prop::collection::vec(-1.0f64..500.0, 0..20)
    ) {
        let mut record = MaintenanceRecord::new(life, life);
        let mut previous = 0.0;
        for h in increments {
            record.accrue(h);
            prop_assert!(record.fan_hours >= previous);
            previous = record.fan_hours;
            prop_assert!(record.fan_remaining() >= 0.0);
            prop_assert!(record.fan_remaining() <= life);
        }
    }

    #[test]
    fn test_decode_never_panics(line in ".{0,200}") {
        match decode_line(&line) {
            Inbound::Message(_) | Inbound::Unknown { .. } | Inbound::Malformed { .. } => {}
        }
    }
}
