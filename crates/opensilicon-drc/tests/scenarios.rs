use std::collections::BTreeMap;

use opensilicon_core::commands::{MoveInstanceCommand, PaintCommand};
use opensilicon_core::{
    ArraySpec, Cell, CellId, CellInstance, DirtyKind, ErrorCode, ErrorKind, ErrorKindSet, ErrorSet, LayoutDatabase,
    PlaneTile, Rect, RuleRef, Transform,
};
use opensilicon_drc::{
    CancelToken, Checker, DrcConfig, NullRedisplay, RecordingRedisplay, Redisplay, Rule, RuleDeck, RunOutcome,
};
use uuid::Uuid;

const METAL: u32 = 1;
const CONTACT: u32 = 4;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn checker(deck: RuleDeck, halo: i64, step: i64) -> Checker {
    let config = DrcConfig::default().with_halo(halo).with_step(step);
    Checker::new(Box::new(deck), &config).unwrap()
}

fn errors_of(db: &LayoutDatabase, cell: &CellId) -> Vec<PlaneTile<ErrorSet>> {
    db.cell(cell).unwrap().errors.canonical_tiles()
}

fn rects_of_kind(tiles: &[PlaneTile<ErrorSet>], kind: ErrorKind) -> Vec<Rect> {
    tiles
        .iter()
        .filter(|t| t.value.iter().any(|c| c.kind == kind))
        .map(|t| t.rect)
        .collect()
}

/// Error content of every cell, keyed by cell name.
fn snapshot(db: &LayoutDatabase) -> BTreeMap<String, Vec<PlaneTile<ErrorSet>>> {
    db.all_cells()
        .map(|c| (c.name.clone(), c.errors.canonical_tiles()))
        .collect()
}

#[test]
fn test_narrow_wire_reports_one_paint_error() {
    init_logging();
    let mut db = LayoutDatabase::new("width");
    let top = db.add_cell(Cell::new("top"));
    let deck = RuleDeck::new("t").with_rule(Rule::MinWidth { layer: METAL, width: 3 });
    let mut checker = checker(deck, 5, 100);

    checker
        .execute(&mut db, Box::new(PaintCommand::new(top, Rect::new(0, 0, 2, 20), METAL)))
        .unwrap();
    assert!(checker.is_pending(&top));
    checker.run(&mut db, &mut NullRedisplay, &CancelToken::new()).unwrap();

    assert_eq!(
        errors_of(&db, &top),
        vec![PlaneTile {
            rect: Rect::new(0, 0, 2, 20),
            value: ErrorSet::single(ErrorCode::new(ErrorKind::PaintRuleViolation, RuleRef(0))),
        }]
    );
    assert!(checker.pending().is_empty());
}

fn two_leaves(dx: i64) -> (LayoutDatabase, CellId, CellId, Uuid) {
    let mut db = LayoutDatabase::new("overlap");
    let top = db.add_cell(Cell::new("top"));
    let leaf = db.add_cell(Cell::new("leaf"));
    db.paint(&leaf, Rect::new(0, 0, 10, 10), METAL).unwrap();
    db.add_instance(&top, CellInstance::new(leaf, "a", Transform::IDENTITY)).unwrap();
    let b = db
        .add_instance(&top, CellInstance::new(leaf, "b", Transform::translate(dx, 0)))
        .unwrap();
    (db, top, leaf, b)
}

#[test]
fn test_moved_placement_overlap_and_undo() {
    init_logging();
    let (mut db, top, leaf, b) = two_leaves(20);
    let deck = RuleDeck::new("t").with_rule(Rule::NoOverlap { layer: METAL });
    let mut checker = checker(deck, 2, 100);
    checker.mark_cell(&mut db, &leaf).unwrap();
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert!(errors_of(&db, &top).is_empty());

    checker
        .execute(&mut db, Box::new(MoveInstanceCommand::new(top, b, -11, 0)))
        .unwrap();
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert_eq!(
        errors_of(&db, &top),
        vec![PlaneTile {
            rect: Rect::new(9, 0, 10, 10),
            value: ErrorSet::single(ErrorCode::new(ErrorKind::InteractionRuleViolation, RuleRef(0))),
        }]
    );
    assert!(errors_of(&db, &leaf).is_empty());

    let mut redisplay = RecordingRedisplay::default();
    checker.undo(&mut db).unwrap();
    checker.catch_up(&mut db, &mut redisplay).unwrap();
    assert!(errors_of(&db, &top).is_empty());
    assert_eq!(redisplay.notices.len(), 1);
    assert_eq!(redisplay.notices[0].cell, top);
    assert_eq!(redisplay.notices[0].area, Rect::new(9, 0, 10, 10));
    assert_eq!(
        redisplay.notices[0].kinds,
        ErrorKindSet::of(ErrorKind::InteractionRuleViolation)
    );
}

/// Two cells drawing the same contact where they meet. The right one is
/// placed `shift` units up.
fn contact_pair(shift: i64) -> (LayoutDatabase, CellId, Uuid) {
    let mut db = LayoutDatabase::new("abut");
    let top = db.add_cell(Cell::new("top"));
    let left = db.add_cell(Cell::new("left"));
    let right = db.add_cell(Cell::new("right"));
    db.paint(&left, Rect::new(0, 0, 10, 12), METAL).unwrap();
    db.paint(&left, Rect::new(8, 4, 12, 8), CONTACT).unwrap();
    db.paint(&right, Rect::new(10, 0, 20, 12), METAL).unwrap();
    db.paint(&right, Rect::new(8, 4, 12, 8), CONTACT).unwrap();
    db.add_instance(&top, CellInstance::new(left, "l", Transform::IDENTITY)).unwrap();
    let r = db
        .add_instance(&top, CellInstance::new(right, "r", Transform::translate(0, shift)))
        .unwrap();
    (db, top, r)
}

/// The shifted contact is reported where the two copies disagree, which is a
/// one-unit strip along its bottom edge and another along its top edge.
#[test]
fn test_shifted_contact_is_an_abutment_mismatch() {
    init_logging();
    let (mut db, top, r) = contact_pair(0);
    let deck = RuleDeck::new("t").with_exact_overlap(CONTACT, &[]);
    let mut checker = checker(deck, 2, 100);
    checker.mark_cell(&mut db, &top).unwrap();
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert!(errors_of(&db, &top).is_empty());

    let mut redisplay = RecordingRedisplay::default();
    checker
        .execute(&mut db, Box::new(MoveInstanceCommand::new(top, r, 0, 1)))
        .unwrap();
    checker.catch_up(&mut db, &mut redisplay).unwrap();

    let tiles = errors_of(&db, &top);
    assert_eq!(
        rects_of_kind(&tiles, ErrorKind::AbutmentMismatch),
        vec![Rect::new(8, 4, 12, 5), Rect::new(8, 8, 12, 9)]
    );
    assert!(tiles
        .iter()
        .all(|t| t.value.iter().all(|c| c.rule == RuleRef::SUBCELL_OVERLAP)));
    assert_eq!(redisplay.notices.len(), 1);
    assert_eq!(redisplay.notices[0].area, Rect::new(8, 4, 12, 9));

    let why = checker.why(&db, &top, Rect::new(0, 0, 20, 20)).unwrap();
    assert_eq!(why.len(), 2);
    assert!(why
        .iter()
        .all(|v| v.message == "Overlapping subcells do not match exactly"));
}

#[test]
fn test_clean_cells_never_pend() {
    init_logging();
    let (mut db, top, _) = contact_pair(0);
    let idle = db.add_cell(Cell::new("idle"));
    db.paint(&idle, Rect::new(0, 0, 50, 50), METAL).unwrap();
    let deck = RuleDeck::new("t").with_exact_overlap(CONTACT, &[]);
    let mut checker = checker(deck, 2, 100);
    assert!(checker.pending().is_empty());

    checker.mark_cell(&mut db, &top).unwrap();
    assert!(!checker.is_pending(&idle));
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert!(checker.pending().is_empty());
    assert!(db.all_cells().all(|c| !c.has_dirty()));
}

/// Narrow top-level wire, two overlapping placements and an array whose
/// elements overlap each other.
fn busy_layout() -> (LayoutDatabase, CellId, CellId) {
    let mut db = LayoutDatabase::new("busy");
    let top = db.add_cell(Cell::new("top"));
    let leaf = db.add_cell(Cell::new("leaf"));
    db.paint(&leaf, Rect::new(0, 0, 10, 10), METAL).unwrap();
    db.paint(&top, Rect::new(30, 30, 32, 70), METAL).unwrap();
    db.add_instance(&top, CellInstance::new(leaf, "a", Transform::translate(50, 10)))
        .unwrap();
    db.add_instance(&top, CellInstance::new(leaf, "b", Transform::translate(59, 10)))
        .unwrap();
    db.add_instance(
        &top,
        CellInstance::new(leaf, "grid", Transform::translate(100, 0)).arrayed(ArraySpec::grid(2, 2, 9, 9)),
    )
    .unwrap();
    (db, top, leaf)
}

fn busy_deck() -> RuleDeck {
    RuleDeck::new("t")
        .with_rule(Rule::MinWidth { layer: METAL, width: 3 })
        .with_rule(Rule::NoOverlap { layer: METAL })
}

#[test]
fn test_one_big_mark_equals_many_small_marks() {
    init_logging();
    let area = Rect::new(0, 0, 200, 100);

    let (mut db, top, leaf) = busy_layout();
    let mut big = checker(busy_deck(), 3, 40);
    big.mark_cell(&mut db, &leaf).unwrap();
    big.mark_dirty(&mut db, &top, area, DirtyKind::PaintChanged).unwrap();
    big.catch_up(&mut db, &mut NullRedisplay).unwrap();
    let expected = snapshot(&db);

    let (mut db, top, leaf) = busy_layout();
    let mut small = checker(busy_deck(), 3, 40);
    small.mark_cell(&mut db, &leaf).unwrap();
    for y in (0..100).step_by(10) {
        for x in (0..200).step_by(10) {
            small
                .mark_dirty(&mut db, &top, Rect::new(x, y, x + 10, y + 10), DirtyKind::PaintChanged)
                .unwrap();
        }
    }
    small.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert_eq!(snapshot(&db), expected);

    let top_errors = &expected["top"];
    assert!(rects_of_kind(top_errors, ErrorKind::PaintRuleViolation).contains(&Rect::new(30, 30, 32, 70)));
    assert!(rects_of_kind(top_errors, ErrorKind::InteractionRuleViolation).contains(&Rect::new(59, 10, 60, 20)));
}

/// A two-unit leaf wire placed in a close pair, alone, and in another
/// close pair.
fn spaced_wires() -> (LayoutDatabase, CellId, CellId) {
    let mut db = LayoutDatabase::new("wires");
    let top = db.add_cell(Cell::new("top"));
    let leaf = db.add_cell(Cell::new("leaf"));
    db.paint(&leaf, Rect::new(0, 0, 2, 10), METAL).unwrap();
    for (i, x) in [0, 3, 250, 500, 503].into_iter().enumerate() {
        db.add_instance(&top, CellInstance::new(leaf, &format!("w{}", i), Transform::translate(x, 0)))
            .unwrap();
    }
    (db, top, leaf)
}

#[test]
fn test_strip_by_strip_drain_matches_one_pass() {
    init_logging();
    let deck = || RuleDeck::new("t").with_rule(Rule::MinWidth { layer: METAL, width: 3 });

    let (mut db, top, leaf) = spaced_wires();
    let mut whole = checker(deck(), 3, 1000);
    whole.mark_cell(&mut db, &leaf).unwrap();
    whole
        .mark_dirty(&mut db, &top, Rect::new(0, 0, 510, 10), DirtyKind::PaintChanged)
        .unwrap();
    whole.catch_up(&mut db, &mut NullRedisplay).unwrap();
    let expected = snapshot(&db);

    let (mut db, top, leaf) = spaced_wires();
    let mut strips = checker(deck(), 3, 1000);
    strips.mark_cell(&mut db, &leaf).unwrap();
    strips.catch_up(&mut db, &mut NullRedisplay).unwrap();
    for x in (0..510).step_by(10) {
        strips
            .mark_dirty(&mut db, &top, Rect::new(x, 0, x + 10, 10), DirtyKind::PaintChanged)
            .unwrap();
        strips.catch_up(&mut db, &mut NullRedisplay).unwrap();
    }
    assert_eq!(snapshot(&db), expected);

    let top_errors = &expected["top"];
    assert!(rects_of_kind(top_errors, ErrorKind::InteractionRuleViolation).contains(&Rect::new(0, 0, 2, 10)));
    assert!(top_errors.iter().any(|t| t.rect == Rect::new(250, 0, 252, 10)));
}

#[test]
fn test_failed_square_commits_nothing() {
    init_logging();
    let mut db = LayoutDatabase::new("deep");
    let top = db.add_cell(Cell::new("top"));
    let mid = db.add_cell(Cell::new("mid"));
    let leaf = db.add_cell(Cell::new("leaf"));
    db.paint(&leaf, Rect::new(0, 0, 10, 10), METAL).unwrap();
    db.add_instance(&mid, CellInstance::new(leaf, "l", Transform::IDENTITY)).unwrap();
    db.add_instance(&top, CellInstance::new(mid, "m", Transform::IDENTITY)).unwrap();
    db.paint(&top, Rect::new(12, 0, 14, 10), METAL).unwrap();

    let config = DrcConfig {
        max_depth: 1,
        ..DrcConfig::default().with_halo(3).with_step(100)
    };
    let deck = RuleDeck::new("t").with_rule(Rule::MinWidth { layer: METAL, width: 3 });
    let mut checker = Checker::new(Box::new(deck), &config).unwrap();
    checker.mark_cell(&mut db, &top).unwrap();

    assert!(checker.catch_up(&mut db, &mut NullRedisplay).is_err());
    assert!(errors_of(&db, &top).is_empty());
    assert!(db.cell(&top).unwrap().has_dirty());
    assert!(checker.is_pending(&top));

    // Nothing changed, so trying again fails the same way.
    assert!(checker.catch_up(&mut db, &mut NullRedisplay).is_err());
    assert!(errors_of(&db, &top).is_empty());
    assert!(checker.is_pending(&top));
}

#[test]
fn test_second_pass_changes_nothing() {
    init_logging();
    let (mut db, top, leaf) = busy_layout();
    let mut checker = checker(busy_deck(), 3, 40);
    checker.mark_cell(&mut db, &leaf).unwrap();
    checker.mark_cell(&mut db, &top).unwrap();
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    let first = snapshot(&db);
    assert!(checker.count_errors(&db, &top).unwrap() > 0);

    let mut redisplay = RecordingRedisplay::default();
    checker.recheck_area(&mut db, &top, Rect::new(-50, -50, 250, 150)).unwrap();
    let squares = checker.catch_up(&mut db, &mut redisplay).unwrap();
    assert!(squares > 0);
    assert!(redisplay.notices.is_empty());
    assert_eq!(snapshot(&db), first);
}

/// Raises the token as soon as anything is redisplayed.
struct CancelOnNotice(CancelToken);

impl Redisplay for CancelOnNotice {
    fn notify_changed(&mut self, _cell: &CellId, _area: Rect, _kinds: ErrorKindSet) {
        self.0.cancel();
    }
}

#[test]
fn test_cancel_and_resume_matches_uninterrupted_pass() {
    init_logging();
    let (mut db, top, leaf) = busy_layout();
    let mut checker_a = checker(busy_deck(), 3, 40);
    checker_a.mark_cell(&mut db, &leaf).unwrap();
    checker_a.mark_cell(&mut db, &top).unwrap();
    checker_a.run(&mut db, &mut NullRedisplay, &CancelToken::new()).unwrap();
    let expected = snapshot(&db);

    let (mut db, top, leaf) = busy_layout();
    let mut checker_b = checker(busy_deck(), 3, 40);
    checker_b.mark_cell(&mut db, &leaf).unwrap();
    checker_b.mark_cell(&mut db, &top).unwrap();
    let token = CancelToken::new();
    let mut interrupts = 0;
    loop {
        token.reset();
        match checker_b.run(&mut db, &mut CancelOnNotice(token.clone()), &token).unwrap() {
            RunOutcome::Cancelled { squares } => {
                assert!(squares > 0);
                interrupts += 1;
            }
            RunOutcome::Completed { .. } => break,
        }
    }
    assert!(interrupts > 0);
    assert_eq!(snapshot(&db), expected);
}

#[test]
fn test_leaf_edit_reaches_array_parent() {
    init_logging();
    let mut db = LayoutDatabase::new("array");
    let top = db.add_cell(Cell::new("top"));
    let leaf = db.add_cell(Cell::new("leaf"));
    db.paint(&leaf, Rect::new(0, 0, 10, 10), METAL).unwrap();
    db.add_instance(
        &top,
        CellInstance::new(leaf, "row", Transform::IDENTITY).arrayed(ArraySpec::grid(3, 1, 10, 0)),
    )
    .unwrap();
    let deck = RuleDeck::new("t").with_rule(Rule::NoOverlap { layer: METAL });
    let mut checker = checker(deck, 2, 100);
    checker.mark_cell(&mut db, &leaf).unwrap();
    assert!(checker.is_pending(&top));
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();
    assert!(errors_of(&db, &top).is_empty());

    // Widen the leaf so that neighbouring elements overlap.
    checker
        .execute(&mut db, Box::new(PaintCommand::new(leaf, Rect::new(10, 0, 11, 10), METAL)))
        .unwrap();
    assert!(checker.is_pending(&top));
    checker.catch_up(&mut db, &mut NullRedisplay).unwrap();

    let tiles = errors_of(&db, &top);
    assert_eq!(
        rects_of_kind(&tiles, ErrorKind::InteractionRuleViolation),
        vec![Rect::new(10, 0, 11, 10)]
    );
    assert!(errors_of(&db, &leaf).is_empty());
    assert!(checker.stats().array_checks > 0);
}

#[test]
fn test_display_check_tiles_redisplays_whole_squares() {
    init_logging();
    let mut db = LayoutDatabase::new("display");
    let top = db.add_cell(Cell::new("top"));
    db.paint(&top, Rect::new(10, 10, 20, 20), METAL).unwrap();
    let config = DrcConfig {
        display_check_tiles: true,
        ..DrcConfig::default().with_halo(3).with_step(50)
    };
    let deck = RuleDeck::new("t").with_rule(Rule::MinWidth { layer: METAL, width: 3 });
    let mut checker = Checker::new(Box::new(deck), &config).unwrap();
    checker.mark_cell(&mut db, &top).unwrap();

    let mut redisplay = RecordingRedisplay::default();
    let squares = checker.catch_up(&mut db, &mut redisplay).unwrap();
    assert_eq!(redisplay.notices.len(), squares);
    assert!(redisplay
        .notices
        .iter()
        .all(|n| n.area.width() == 50 && n.area.height() == 50));
    assert_eq!(checker.count_errors(&db, &top).unwrap(), 0);
}

#[test]
fn test_forced_full_redisplay_covers_each_square() {
    init_logging();
    let mut db = LayoutDatabase::new("redisplay");
    let top = db.add_cell(Cell::new("top"));
    db.paint(&top, Rect::new(10, 10, 12, 90), METAL).unwrap();
    let config = DrcConfig {
        force_full_redisplay: true,
        ..DrcConfig::default().with_halo(3).with_step(50)
    };
    let deck = RuleDeck::new("t").with_rule(Rule::MinWidth { layer: METAL, width: 3 });
    let mut checker = Checker::new(Box::new(deck), &config).unwrap();
    assert!(checker.config().force_full_redisplay);
    checker.mark_cell(&mut db, &top).unwrap();

    let mut redisplay = RecordingRedisplay::default();
    let squares = checker.catch_up(&mut db, &mut redisplay).unwrap();
    assert!(squares > 1);
    assert_eq!(redisplay.notices.len(), squares);
    for notice in &redisplay.notices {
        assert_eq!((notice.area.width(), notice.area.height()), (50, 50));
        assert_eq!(notice.area.xmin % 50, 0);
        assert_eq!(notice.area.ymin % 50, 0);
    }
    assert_eq!(checker.stats().redisplays, squares as u64);
    assert!(checker.count_errors(&db, &top).unwrap() > 0);
}

#[test]
fn test_rule_deck_and_config_from_json() {
    let deck = RuleDeck::from_json(
        r#"{
            "name": "demo",
            "rules": [
                {"kind": "min_width", "layer": 1, "width": 3},
                {"kind": "min_spacing", "layer": 1, "spacing": 4}
            ],
            "exact_overlap": [{"layer": 4, "conflicts": [5]}]
        }"#,
    )
    .unwrap();
    let config = DrcConfig::from_json(r#"{"step_size": 80}"#).unwrap();
    let checker = Checker::new(Box::new(deck), &config).unwrap();
    assert_eq!(checker.config().halo, 4);
    assert_eq!(checker.config().step, 80);
}
