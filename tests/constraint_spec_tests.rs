use gpp_sim::constraint::{AttrBounds, ConstraintOp, ConstraintSource, ConstraintSpec};
use gpp_sim::error::GppError;
use gpp_sim::regime::RaceRegime;
use gpp_sim::scenario::ScenarioDraw;
use gpp_sim::slate::{ArchetypeAttrs, Driver, RosterRules, Slate, TrackArchetype};

fn driver(id: &str, team: &str) -> Driver {
    Driver {
        driver_id: id.to_string(),
        salary: 7000,
        team_id: team.to_string(),
        attrs: ArchetypeAttrs {
            skill: 0.6,
            aggression: 0.4,
            shadow_risk: 0.3,
            realpolitik_pos: 0.5,
        },
        proj_points: 38.0,
        proj_stddev: 11.0,
    }
}

fn test_slate() -> Slate {
    Slate {
        slate_id: "spec-test".to_string(),
        drivers: (0..12)
            .map(|i| driver(&format!("D{:02}", i), &format!("T{}", i % 4)))
            .collect(),
        rules: RosterRules::default(),
        track: TrackArchetype::Intermediate,
    }
}

fn draw(laps: Vec<u32>, fastest: Vec<u32>, dominator: Vec<bool>) -> ScenarioDraw {
    let d = laps.len();
    ScenarioDraw {
        regime: RaceRegime::Dominator,
        start: (1..=d as i32).collect(),
        finish: (1..=d as i32).collect(),
        laps_led: laps,
        fastest_laps: fastest,
        incident: vec![false; d],
        dominator,
    }
}

#[test]
fn compile_produces_roster_and_salary_rows() {
    let slate = test_slate();
    let spec = ConstraintSpec::compile(&ConstraintSource::default(), &slate).expect("compile");

    let linear = spec.linear_constraints();
    let roster = linear.iter().find(|c| c.label == "roster_size").unwrap();
    assert_eq!(roster.op, ConstraintOp::Eq);
    assert_eq!(roster.rhs, 6.0);
    assert!(roster.coeffs.iter().all(|&c| c == 1.0));

    let salary = linear.iter().find(|c| c.label == "salary_cap").unwrap();
    assert_eq!(salary.op, ConstraintOp::Le);
    assert_eq!(salary.rhs, 50_000.0);
    assert_eq!(salary.coeffs[0], 7000.0);
}

#[test]
fn compile_hash_changes_with_the_source() {
    let slate = test_slate();
    let a = ConstraintSpec::compile(&ConstraintSource::default(), &slate).unwrap();
    let mut source = ConstraintSource::default();
    source.max_dominators = 2;
    let b = ConstraintSpec::compile(&source, &slate).unwrap();
    assert_ne!(a.spec_hash(), b.spec_hash());
}

#[test]
fn contradictory_sources_fail_to_compile() {
    let slate = test_slate();

    let mut source = ConstraintSource::default();
    source.race_length = 0;
    assert!(matches!(
        ConstraintSpec::compile(&source, &slate),
        Err(GppError::SpecCompile { .. })
    ));

    let mut source = ConstraintSource::default();
    source.dominator_lap_threshold = 10_000;
    assert!(matches!(
        ConstraintSpec::compile(&source, &slate),
        Err(GppError::SpecCompile { .. })
    ));

    let mut source = ConstraintSource::default();
    source.attr_bounds[0] = AttrBounds { lo: 0.9, hi: 0.1 };
    assert!(matches!(
        ConstraintSpec::compile(&source, &slate),
        Err(GppError::SpecCompile { .. })
    ));

    // Roster cannot be partitioned: 4 teams, stacks [5, 5], roster 6.
    let mut slate = test_slate();
    slate.rules.min_stack = 5;
    slate.rules.max_stack = 5;
    assert!(matches!(
        ConstraintSpec::compile(&ConstraintSource::default(), &slate),
        Err(GppError::SpecCompile { .. })
    ));
}

#[test]
fn veto_names_the_failing_predicate() {
    let slate = test_slate();
    let spec = ConstraintSpec::compile(&ConstraintSource::default(), &slate).unwrap();
    let d = slate.len();

    let ok = draw(vec![10; d], vec![5; d], vec![false; d]);
    assert_eq!(spec.veto(&ok), None);

    // 12 * 30 = 360 laps led > 267.
    let over = draw(vec![30; d], vec![5; d], vec![false; d]);
    assert_eq!(spec.veto(&over), Some("laps_led_budget"));

    let mut doms = vec![false; d];
    for flag in doms.iter_mut().take(4) {
        *flag = true;
    }
    let too_many = draw(vec![10; d], vec![5; d], doms);
    assert_eq!(spec.veto(&too_many), Some("max_dominators"));

    let mut fastest = vec![5; d];
    fastest[0] = 50;
    let bad_fastest = draw(vec![10; d], fastest, vec![false; d]);
    assert_eq!(spec.veto(&bad_fastest), Some("fastest_laps_bound"));
}

#[test]
fn driver_bounds_gate_the_slate() {
    let mut source = ConstraintSource::default();
    source.attr_bounds[0] = AttrBounds { lo: 0.5, hi: 1.0 };
    let slate = test_slate();
    let spec = ConstraintSpec::compile(&source, &slate).unwrap();
    assert!(spec.check_driver_bounds(&slate).is_ok());

    let mut low_skill = test_slate();
    low_skill.drivers[2].attrs.skill = 0.1;
    assert!(matches!(
        spec.check_driver_bounds(&low_skill),
        Err(GppError::SpecCompile { .. })
    ));
}

#[test]
fn extra_linear_rows_must_match_the_slate_width() {
    let slate = test_slate();
    let mut source = ConstraintSource::default();
    source.extra_linear.push(gpp_sim::constraint::LinearConstraint {
        label: "short-row".to_string(),
        coeffs: vec![1.0; 3],
        op: ConstraintOp::Le,
        rhs: 2.0,
    });
    assert!(matches!(
        ConstraintSpec::compile(&source, &slate),
        Err(GppError::SpecCompile { .. })
    ));
}
