use gpp_sim::cache::SlateCache;
use gpp_sim::constraint::{ConstraintSource, ConstraintSpec};
use gpp_sim::ownership::OwnershipPrediction;
use gpp_sim::payout::{CurveModel, PayoutCurve, PayoutTier};
use gpp_sim::slate::{ArchetypeAttrs, Driver, RosterRules, Slate, TrackArchetype};

fn test_slate() -> Slate {
    Slate {
        slate_id: "cache-test".to_string(),
        drivers: (0..8)
            .map(|i| Driver {
                driver_id: format!("D{:02}", i),
                salary: 5000 + 400 * i,
                team_id: format!("T{}", i % 3),
                attrs: ArchetypeAttrs {
                    skill: 0.5,
                    aggression: 0.4,
                    shadow_risk: 0.3,
                    realpolitik_pos: 0.5,
                },
                proj_points: 30.0,
                proj_stddev: 9.0,
            })
            .collect(),
        rules: RosterRules::default(),
        track: TrackArchetype::ShortTrack,
    }
}

fn temp_cache(tag: &str) -> SlateCache {
    let dir = std::env::temp_dir().join(format!("gpp-sim-cache-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    SlateCache::new(dir)
}

#[test]
fn fingerprint_is_stable_and_sensitive() {
    let slate = test_slate();
    let spec = ConstraintSpec::compile(&ConstraintSource::default(), &slate).unwrap();

    let a = slate.fingerprint(spec.spec_hash());
    let b = slate.fingerprint(spec.spec_hash());
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);

    // Any driver change moves the fingerprint.
    let mut changed = test_slate();
    changed.drivers[0].salary += 100;
    assert_ne!(changed.fingerprint(spec.spec_hash()), a);

    // So does a changed constraint source.
    let mut source = ConstraintSource::default();
    source.max_dominators = 2;
    let spec2 = ConstraintSpec::compile(&source, &slate).unwrap();
    assert_ne!(slate.fingerprint(spec2.spec_hash()), a);
}

#[test]
fn payout_curve_round_trips_and_is_write_once() {
    let cache = temp_cache("curve");
    let curve = PayoutCurve::from_params(CurveModel::PowerLaw, 250.0, 0.7, PayoutTier::Medium, 40);

    assert!(cache.store_payout_curve("fp-one", &curve).unwrap());
    // Second store is a no-op by design.
    assert!(!cache.store_payout_curve("fp-one", &curve).unwrap());

    let loaded = cache.load_payout_curve("fp-one").unwrap().expect("hit");
    assert_eq!(loaded.model, CurveModel::PowerLaw);
    assert_eq!(loaded.paid_cutoff, 40);
    assert!((loaded.a - 250.0).abs() < 1e-12);

    assert!(cache.load_payout_curve("fp-other").unwrap().is_none());
}

#[test]
fn ownership_predictions_round_trip() {
    let cache = temp_cache("own");
    let predictions: Vec<OwnershipPrediction> = (0..5)
        .map(|i| OwnershipPrediction {
            driver_id: format!("D{:02}", i),
            mean: 0.1 * i as f64,
            p05: 0.05 * i as f64,
            p95: 0.12 * i as f64,
        })
        .collect();

    assert!(cache.store_ownership("fp-own", &predictions).unwrap());
    let loaded = cache.load_ownership("fp-own").unwrap().expect("hit");
    assert_eq!(loaded.len(), 5);
    assert_eq!(loaded[3].driver_id, "D03");
    assert!((loaded[3].mean - 0.3).abs() < 1e-12);
}
