use super::*;
use crate::agent::Agent;
use crate::builder::{lit, v};
use crate::condition::Relation;
use crate::explain::RecordingSink;
use crate::instantiation::PrefKind;
use crate::test_utils::{answer_world, fire_answer, fire_result, rule_lines, AnswerWorld};

fn lines(conds: &[&str], actions: &[&str]) -> (Vec<String>, Vec<String>) {
    let mut conds: Vec<String> = conds.iter().map(|s| s.to_string()).collect();
    let mut actions: Vec<String> = actions.iter().map(|s| s.to_string()).collect();
    conds.sort();
    actions.sort();
    (conds, actions)
}

fn recorded(config: ChunkConfig) -> (AnswerWorld, RecordingSink) {
    let mut world = answer_world(config);
    let sink = RecordingSink::detailed();
    world.agent.set_sink(Box::new(sink.clone()));
    (world, sink)
}

/// Adds `(S1 ^count 5)` and fires `copy` in S2:
/// `(S2 ^superstate S1) (S1 ^count <c>) --> (S2 ^number <c> +)`.
fn fire_copy_count(world: &mut AnswerWorld) -> InstId {
    let (s1, s2, five) = (world.s1, world.s2, world.five);
    let agent = &mut world.agent;
    agent.add_wme(s1, "count", five);
    let superstate = agent.sym("superstate");
    let count = agent.sym("count");
    let number = agent.sym("number");
    agent
        .instantiate("copy", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([v("s"), lit(count), v("c")])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(number), v("c")])
        .fire()
        .expect("copy matches")
}

// ========== BASIC CHUNKS ==========

#[test]
fn superstate_test_becomes_a_general_rule() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("chunk learned");

    assert_eq!(learned.name, "chunk-1*d1");
    assert_eq!(learned.kind, RuleKind::Chunk);
    assert!(!learned.repaired);
    assert_eq!(
        rule_lines(&world.agent, &learned.name),
        lines(
            &["(state <s> ^foo <x>)", "(<x> ^bar 5)"],
            &["(<s> ^answer 5 +)"]
        )
    );
    // Rules are printed in match order: the goal condition first.
    let text = world
        .agent
        .productions
        .get(learned.id)
        .map(|p| p.display(&world.agent.symbols).to_string())
        .unwrap_or_default();
    assert_eq!(
        text,
        "sp {chunk-1*d1\n   (state <s> ^foo <x>)\n   (<x> ^bar 5)\n   -->\n   (<s> ^answer 5 +)\n}"
    );
}

#[test]
fn results_are_supported_by_the_learned_rule() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("chunk learned");

    let agent = &world.agent;
    let chunk_inst = agent.trace.inst(learned.inst);
    assert_eq!(chunk_inst.rule, "chunk-1*d1");
    assert_eq!(chunk_inst.match_goal, world.s1);
    assert_eq!(chunk_inst.match_goal_level, 1);
    assert_eq!(chunk_inst.conditions.len(), 2);

    let answer = agent.symbols.find_str_constant("answer").expect("interned");
    let wme = agent
        .wm
        .find(world.s1, answer, world.five, false)
        .expect("result stays in working memory");
    let support = agent.wm.wme(wme).supported_by.expect("supported");
    assert_eq!(agent.trace.pref(support).inst, learned.inst);
    assert_eq!(agent.trace.pref(support).level, 1);
}

#[test]
fn learned_instantiation_gets_fresh_identities() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    let original: Vec<_> = world.agent.trace.inst(inst).condition_identities();
    let learned = world.agent.learn(inst).expect("chunk learned");

    let cloned = world.agent.trace.inst(learned.inst).condition_identities();
    assert!(!cloned.is_empty());
    assert!(cloned.iter().all(|id| !original.contains(id)));
    world.agent.chunker.identities().assert_invariants();
}

#[test]
fn chain_of_sub_goal_rules_collapses_into_one_chunk() {
    let mut world = answer_world(ChunkConfig::default());
    let (s2, five) = (world.s2, world.five);
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let foo = agent.sym("foo");
    let bar = agent.sym("bar");
    let copy = agent.sym("copy");
    let seen = agent.sym("seen");
    let answer = agent.sym("answer");

    agent
        .instantiate("copy", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([v("s"), lit(foo), v("x")])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(copy), v("x")])
        .fire()
        .expect("copy fires");
    agent
        .instantiate("inspect", s2)
        .matches([lit(s2), lit(copy), v("x")])
        .matches([v("x"), lit(bar), v("n")])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(seen), v("n")])
        .fire()
        .expect("inspect fires");
    let report = agent
        .instantiate("report", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(seen), v("n")])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), v("n")])
        .fire()
        .expect("report fires");

    let sink = RecordingSink::new();
    agent.set_sink(Box::new(sink.clone()));
    let learned = agent.learn(report).expect("chunk learned");
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(
            &["(state <s> ^foo <x>)", "(<x> ^bar <c>)"],
            &["(<s> ^answer <c> +)"]
        )
    );
    assert_eq!(sink.learned()[0].instantiations, 3);
    assert!(agent.wm.find(world.s1, answer, five, false).is_some());
}

// ========== IDENTITY ==========

#[test]
fn values_passed_through_the_sub_goal_stay_variables() {
    let mut world = answer_world(ChunkConfig::default());
    fire_copy_count(&mut world);
    let s2 = world.s2;
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let number = agent.sym("number");
    let answer = agent.sym("answer");
    let report = agent
        .instantiate("report", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(number), v("n")])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), v("n")])
        .fire()
        .expect("report fires");
    let learned = agent.learn(report).expect("chunk learned");
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(&["(state <s> ^count <c>)"], &["(<s> ^answer <c> +)"])
    );
}

#[test]
fn literal_test_in_the_sub_goal_literalizes_the_value() {
    let mut world = answer_world(ChunkConfig::default());
    fire_copy_count(&mut world);
    let (s2, five) = (world.s2, world.five);
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let number = agent.sym("number");
    let answer = agent.sym("answer");
    let report = agent
        .instantiate("report", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(number), lit(five)])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(five)])
        .fire()
        .expect("report fires");
    let learned = agent.learn(report).expect("chunk learned");
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(&["(state <s> ^count 5)"], &["(<s> ^answer 5 +)"])
    );
}

#[test]
fn sub_goal_constraints_are_carried_over() {
    let mut world = answer_world(ChunkConfig::default());
    fire_copy_count(&mut world);
    let s2 = world.s2;
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let number = agent.sym("number");
    let answer = agent.sym("answer");
    let three = agent.int(3);
    let report = agent
        .instantiate("report", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(number), v("n")])
        .constraint(Field::Value, Relation::Greater, lit(three))
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), v("n")])
        .fire()
        .expect("report fires");
    let learned = agent.learn(report).expect("chunk learned");
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(&["(state <s> ^count { <c> > 3 })"], &["(<s> ^answer <c> +)"])
    );
    assert_eq!(agent.stats().constraints_attached, 1);
}

#[test]
fn constraints_stay_behind_when_attachment_is_off() {
    let mut config = ChunkConfig::default();
    config.attach_constraints = false;
    let mut world = answer_world(config);
    fire_copy_count(&mut world);
    let s2 = world.s2;
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let number = agent.sym("number");
    let answer = agent.sym("answer");
    let three = agent.int(3);
    let report = agent
        .instantiate("report", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(number), v("n")])
        .constraint(Field::Value, Relation::Greater, lit(three))
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), v("n")])
        .fire()
        .expect("report fires");
    let learned = agent.learn(report).expect("chunk learned");
    let (conds, _) = rule_lines(agent, &learned.name);
    assert_eq!(conds, vec!["(state <s> ^count <c>)".to_string()]);
}

// ========== REPAIR ==========

#[test]
fn superstate_link_reconnects_a_higher_goal() {
    let mut world = answer_world(ChunkConfig::default());
    let (s1, five) = (world.s1, world.five);
    let agent = &mut world.agent;
    let s2 = world.s2;
    let s3 = agent.push_goal();
    agent.add_wme(s3, "top-state", s1);
    let top = agent.sym("top-state");
    let foo = agent.sym("foo");
    let bar = agent.sym("bar");
    let answer = agent.sym("answer");
    let sink = RecordingSink::new();
    agent.set_sink(Box::new(sink.clone()));

    let inst = agent
        .instantiate("reach-up", s3)
        .matches([lit(s3), lit(top), v("top")])
        .matches([v("top"), lit(foo), v("x")])
        .matches([v("x"), lit(bar), lit(five)])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(answer), lit(five)])
        .fire()
        .expect("fires");
    let learned = agent.learn(inst).expect("repaired chunk learned");

    assert!(learned.repaired);
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(
            &[
                "(state <s> ^superstate <s1>)",
                "(state <s1> ^foo <x>)",
                "(<x> ^bar 5)"
            ],
            &["(<s> ^answer 5 +)"]
        )
    );
    assert!(sink.events().contains(&ExplanationEvent::Repaired {
        rule: "chunk-1*d1".to_string(),
        conditions_added: 1,
    }));
    let stats = agent.stats();
    assert_eq!((stats.repairs, stats.repairs_succeeded), (1, 1));
}

/// S1 holds `(S1 ^deep Z1) (Z1 ^item Y1) (Y1 ^color red)`. A retracted rule
/// once copied Y1 into S2, so nothing explains how the sub-goal found it.
fn fire_lost_link(world: &mut AnswerWorld) -> InstId {
    let (s1, s2) = (world.s1, world.s2);
    let agent = &mut world.agent;
    let z = agent.new_identifier('Z');
    let y = agent.new_identifier('Y');
    let red = agent.sym("red");
    agent.add_wme(s1, "deep", z);
    agent.add_wme(z, "item", y);
    agent.add_wme(y, "color", red);
    let superstate = agent.sym("superstate");
    let deep = agent.sym("deep");
    let item = agent.sym("item");
    let color = agent.sym("color");
    let target = agent.sym("target");
    let answer = agent.sym("answer");

    let finder = agent
        .instantiate("find", s2)
        .matches([lit(s1), lit(deep), v("z")])
        .matches([v("z"), lit(item), v("y")])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(target), v("y")])
        .fire()
        .expect("find fires");
    agent.retract_instantiation(finder);
    agent
        .instantiate("describe", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(target), v("y")])
        .matches([v("y"), lit(color), lit(red)])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(red)])
        .fire()
        .expect("describe fires")
}

#[test]
fn working_memory_path_reconnects_dangling_structure() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_lost_link(&mut world);
    let learned = world.agent.learn(inst).expect("repaired chunk learned");
    assert!(learned.repaired);
    assert_eq!(
        rule_lines(&world.agent, &learned.name),
        lines(
            &["(state <s> ^deep <z>)", "(<z> ^item <y>)", "(<y> ^color red)"],
            &["(<s> ^answer red +)"]
        )
    );
}

/// Like `fire_lost_link`, but the lost identifier is the target of the
/// result: `(S2 ^superstate S1) (S1 ^flag on) (S2 ^target Y1) --> (Y1 ^done t +)`.
fn fire_lost_target(world: &mut AnswerWorld) -> InstId {
    let (s1, s2) = (world.s1, world.s2);
    let agent = &mut world.agent;
    let z = agent.new_identifier('Z');
    let y = agent.new_identifier('Y');
    let on = agent.sym("on");
    let t = agent.sym("t");
    agent.add_wme(s1, "deep", z);
    agent.add_wme(z, "item", y);
    agent.add_wme(s1, "flag", on);
    let superstate = agent.sym("superstate");
    let deep = agent.sym("deep");
    let item = agent.sym("item");
    let flag = agent.sym("flag");
    let target = agent.sym("target");
    let done = agent.sym("done");

    let finder = agent
        .instantiate("find", s2)
        .matches([lit(s1), lit(deep), v("z")])
        .matches([v("z"), lit(item), v("y")])
        .prefer(PrefKind::Acceptable, [lit(s2), lit(target), v("y")])
        .fire()
        .expect("find fires");
    agent.retract_instantiation(finder);
    agent
        .instantiate("mark", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([v("s"), lit(flag), lit(on)])
        .matches([lit(s2), lit(target), v("y")])
        .prefer(PrefKind::Acceptable, [v("y"), lit(done), lit(t)])
        .fire()
        .expect("mark fires")
}

#[test]
fn working_memory_path_reconnects_an_action_target() {
    let (mut world, sink) = recorded(ChunkConfig::default());
    let inst = fire_lost_target(&mut world);
    let learned = world.agent.learn(inst).expect("repaired chunk learned");
    assert!(learned.repaired);
    assert_eq!(
        rule_lines(&world.agent, &learned.name),
        lines(
            &["(state <s> ^flag on)", "(state <s> ^deep <z>)", "(<z> ^item <y>)"],
            &["(<y> ^done t +)"]
        )
    );
    assert!(sink.events().iter().any(|e| matches!(
        e,
        ExplanationEvent::Repaired { conditions_added: 2, .. }
    )));
    let stats = world.agent.stats();
    assert_eq!((stats.repairs, stats.repairs_succeeded), (1, 1));
}

#[test]
fn unrepaired_action_target_is_unconnected() {
    let mut config = ChunkConfig::default();
    config.repair.enabled = false;
    let mut world = answer_world(config);
    let inst = fire_lost_target(&mut world);
    let err = world.agent.learn(inst).unwrap_err();
    assert!(matches!(
        err,
        ChunkError::Unconnected {
            source: ValidationError::UnconnectedAction { .. },
            ..
        }
    ));
    assert!(world.agent.productions.is_empty());
}

#[test]
fn repair_can_be_disabled() {
    let mut config = ChunkConfig::default();
    config.repair.enabled = false;
    let (mut world, sink) = recorded(config);
    let inst = fire_lost_link(&mut world);
    let err = world.agent.learn(inst).unwrap_err();
    assert!(matches!(err, ChunkError::Unconnected { ref name, .. } if name == "chunk-1*d1"));
    assert!(!err.is_policy_stop());
    assert!(world.agent.productions.is_empty());
    assert_eq!(world.agent.stats().validation_failures, 1);
    assert!(matches!(
        sink.events().last(),
        Some(ExplanationEvent::RuleRejected { policy: false, .. })
    ));
}

#[test]
fn dropped_potentials_leave_nothing_to_repair() {
    let mut config = ChunkConfig::default();
    config.keep_ungrounded_potentials = false;
    let mut world = answer_world(config);
    let inst = fire_lost_link(&mut world);
    let err = world.agent.learn(inst).unwrap_err();
    assert_eq!(
        err,
        ChunkError::NoGrounds {
            rule: "describe".to_string()
        }
    );
}

// ========== POLICY STOPS ==========

#[test]
fn identical_chunk_is_not_installed_twice() {
    let (mut world, sink) = recorded(ChunkConfig::default());
    let first = fire_answer(&mut world);
    world.agent.learn(first).expect("first chunk learned");
    world.agent.new_decision_cycle();

    let second = fire_answer(&mut world);
    let err = world.agent.learn(second).unwrap_err();
    assert_eq!(
        err,
        ChunkError::DuplicateChunk {
            name: "chunk-2*d2".to_string(),
            existing: "chunk-1*d1".to_string(),
        }
    );
    assert!(err.is_policy_stop());
    assert_eq!(world.agent.productions.len(), 1);
    let stats = world.agent.stats();
    assert_eq!((stats.chunks, stats.duplicates), (1, 1));
    assert!(matches!(
        sink.events().last(),
        Some(ExplanationEvent::RuleRejected { policy: true, .. })
    ));
}

/// Fires `rule` in S2 matching `(S1 ^foo <x>)` and `(S1 ^count 5)` in the
/// given order, answering `(S1 ^answer 5 +)`.
fn fire_foo_and_count(world: &mut AnswerWorld, rule: &str, count_first: bool) -> InstId {
    let (s2, five) = (world.s2, world.five);
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let foo = agent.sym("foo");
    let count = agent.sym("count");
    let answer = agent.sym("answer");
    let foo_test = [v("s"), lit(foo), v("x")];
    let count_test = [v("s"), lit(count), lit(five)];
    let (first, second) = if count_first {
        (count_test, foo_test)
    } else {
        (foo_test, count_test)
    };
    agent
        .instantiate(rule, s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches(first)
        .matches(second)
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(five)])
        .fire()
        .expect("foo and count match")
}

#[test]
fn match_order_does_not_hide_a_duplicate() {
    let mut world = answer_world(ChunkConfig::default());
    let (s1, five) = (world.s1, world.five);
    world.agent.add_wme(s1, "count", five);

    let forward = fire_foo_and_count(&mut world, "forward", false);
    let learned = world.agent.learn(forward).expect("first chunk learned");
    assert_eq!(
        rule_lines(&world.agent, &learned.name),
        lines(
            &["(state <s> ^foo <x>)", "(state <s> ^count 5)"],
            &["(<s> ^answer 5 +)"]
        )
    );
    world.agent.new_decision_cycle();

    let backward = fire_foo_and_count(&mut world, "backward", true);
    let err = world.agent.learn(backward).unwrap_err();
    assert_eq!(
        err,
        ChunkError::DuplicateChunk {
            name: "chunk-2*d2".to_string(),
            existing: "chunk-1*d1".to_string(),
        }
    );
    assert_eq!(world.agent.productions.len(), 1);
}

#[test]
fn per_cycle_cap_resets_with_the_cycle() {
    let mut config = ChunkConfig::default();
    config.max_chunks_per_cycle = 1;
    let mut world = answer_world(config);
    let first = fire_answer(&mut world);
    world.agent.learn(first).expect("first chunk learned");

    let second = fire_result(&mut world, "other", "other");
    assert_eq!(
        world.agent.learn(second).unwrap_err(),
        ChunkError::MaxChunksReached { limit: 1 }
    );
    assert_eq!(world.agent.stats().max_chunks_stops, 1);

    world.agent.new_decision_cycle();
    let learned = world.agent.learn(second).expect("learned next cycle");
    assert_eq!(learned.name, "chunk-2*d2");
}

#[test]
fn rule_with_only_local_tests_has_no_grounds() {
    let (mut world, sink) = recorded(ChunkConfig::default());
    let (s2, five) = (world.s2, world.five);
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let answer = agent.sym("answer");
    let inst = agent
        .instantiate("guess", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(five)])
        .fire()
        .expect("fires");
    assert_eq!(
        agent.learn(inst).unwrap_err(),
        ChunkError::NoGrounds {
            rule: "guess".to_string()
        }
    );
    assert_eq!(agent.stats().no_grounds, 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn local_results_are_not_learned_from() {
    let (mut world, sink) = recorded(ChunkConfig::default());
    let s2 = world.s2;
    let agent = &mut world.agent;
    let note = agent.sym("note");
    let red = agent.sym("red");
    let inst = agent
        .instantiate("scribble", s2)
        .prefer(PrefKind::Acceptable, [lit(s2), lit(note), lit(red)])
        .fire()
        .expect("fires");
    assert_eq!(
        agent.learn(inst).unwrap_err(),
        ChunkError::NoResults {
            rule: "scribble".to_string()
        }
    );
    assert!(sink.is_empty());
}

#[test]
fn top_goal_firings_have_no_results() {
    let mut world = answer_world(ChunkConfig::default());
    let s1 = world.s1;
    let agent = &mut world.agent;
    let note = agent.sym("note");
    let red = agent.sym("red");
    let inst = agent
        .instantiate("top", s1)
        .prefer(PrefKind::Acceptable, [lit(s1), lit(note), lit(red)])
        .fire()
        .expect("fires");
    assert!(matches!(agent.learn(inst), Err(ChunkError::NoResults { .. })));
}

// ========== JUSTIFICATIONS ==========

#[test]
fn quiescence_test_makes_a_justification() {
    let mut world = answer_world(ChunkConfig::default());
    let s2 = world.s2;
    let agent = &mut world.agent;
    let t = agent.sym("t");
    agent.add_wme(s2, "quiescence", t);
    let superstate = agent.sym("superstate");
    let quiescence = agent.sym("quiescence");
    let foo = agent.sym("foo");
    let answer = agent.sym("answer");
    let inst = agent
        .instantiate("impasse", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([lit(s2), lit(quiescence), lit(t)])
        .matches([v("s"), lit(foo), v("x")])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), v("x")])
        .fire()
        .expect("fires");
    let learned = agent.learn(inst).expect("justification learned");
    assert_eq!(learned.kind, RuleKind::Justification);
    assert_eq!(learned.name, "justify-1*d1");
    assert_eq!(
        rule_lines(agent, &learned.name),
        lines(&["(state S1 ^foo X1)"], &["(S1 ^answer X1 +)"])
    );
    let stats = agent.stats();
    assert_eq!((stats.justifications, stats.quiescence_demotions), (1, 1));
}

#[test]
fn off_learns_nothing() {
    let mut config = ChunkConfig::default();
    config.learning = LearningMode::Off;
    let (mut world, sink) = recorded(config);
    let inst = fire_answer(&mut world);
    assert_eq!(world.agent.learn(inst).unwrap_err(), ChunkError::LearningDisabled);
    assert!(world.agent.productions.is_empty());
    assert!(sink.is_empty());
}

#[test]
fn only_mode_needs_the_goal_flagged() {
    let mut config = ChunkConfig::default();
    config.learning = LearningMode::Only;
    let mut world = answer_world(config);
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("justification learned");
    assert_eq!(learned.kind, RuleKind::Justification);
    assert_eq!(
        rule_lines(&world.agent, &learned.name),
        lines(&["(state S1 ^foo X1)", "(X1 ^bar 5)"], &["(S1 ^answer 5 +)"])
    );

    world.agent.new_decision_cycle();
    world.agent.chunker.set_force_learn(world.s2, true);
    let inst = fire_result(&mut world, "other", "other");
    let learned = world.agent.learn(inst).expect("chunk learned");
    assert_eq!(learned.kind, RuleKind::Chunk);
}

#[test]
fn except_mode_skips_flagged_goals() {
    let mut config = ChunkConfig::default();
    config.learning = LearningMode::Except;
    let mut world = answer_world(config);
    world.agent.chunker.set_dont_learn(world.s2, true);
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("justification learned");
    assert_eq!(learned.kind, RuleKind::Justification);

    world.agent.chunker.set_dont_learn(world.s2, false);
    let inst = fire_result(&mut world, "other", "other");
    assert_eq!(world.agent.learn(inst).expect("learned").kind, RuleKind::Chunk);
}

#[test]
fn bottom_only_skips_goals_with_sub_goals() {
    let mut config = ChunkConfig::default();
    config.bottom_only = true;
    let mut world = answer_world(config);
    world.agent.push_goal();
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("justification learned");
    assert_eq!(learned.kind, RuleKind::Justification);
}

#[test]
fn local_negation_demotes_when_disallowed() {
    let fire = |world: &mut AnswerWorld| {
        let (s2, five) = (world.s2, world.five);
        let agent = &mut world.agent;
        let superstate = agent.sym("superstate");
        let foo = agent.sym("foo");
        let blocked = agent.sym("blocked");
        let answer = agent.sym("answer");
        agent
            .instantiate("unblocked", s2)
            .matches([lit(s2), lit(superstate), v("s")])
            .matches([v("s"), lit(foo), v("x")])
            .negated([lit(s2), lit(blocked), v("b")])
            .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(five)])
            .fire()
            .expect("fires")
    };

    let mut world = answer_world(ChunkConfig::default());
    let inst = fire(&mut world);
    let learned = world.agent.learn(inst).expect("chunk learned");
    assert_eq!(learned.kind, RuleKind::Chunk);
    assert_eq!(
        rule_lines(&world.agent, &learned.name).0,
        vec!["(state <s> ^foo <x>)".to_string()]
    );

    let mut config = ChunkConfig::default();
    config.allow_local_negations = false;
    let mut world = answer_world(config);
    let inst = fire(&mut world);
    let learned = world.agent.learn(inst).expect("justification learned");
    assert_eq!(learned.kind, RuleKind::Justification);
    assert_eq!(world.agent.stats().local_negation_demotions, 1);
}

#[test]
fn grounded_negation_is_kept() {
    let mut world = answer_world(ChunkConfig::default());
    let (s2, five) = (world.s2, world.five);
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let foo = agent.sym("foo");
    let baz = agent.sym("baz");
    let answer = agent.sym("answer");
    let inst = agent
        .instantiate("no-baz", s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([v("s"), lit(foo), v("x")])
        .negated([v("x"), lit(baz), lit(five)])
        .prefer(PrefKind::Acceptable, [v("s"), lit(answer), lit(five)])
        .fire()
        .expect("fires");
    let learned = agent.learn(inst).expect("chunk learned");
    assert_eq!(
        rule_lines(agent, &learned.name).0,
        lines(&["(state <s> ^foo <x>)", "-(<x> ^baz 5)"], &[]).0
    );
}

// ========== BOOKKEEPING ==========

#[test]
fn pass_releases_its_symbol_references() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    let x_refs = world.agent.symbols.refcount(world.x);
    let learned = world.agent.learn(inst).expect("chunk learned");
    let agent = &mut world.agent;
    assert_eq!(agent.symbols.refcount(world.x), x_refs);

    agent.productions.excise(&mut agent.symbols, learned.id);
    for name in ["s", "x"] {
        let var = agent.symbols.find_variable(name).expect("variable interned");
        assert_eq!(agent.symbols.refcount(var), 0, "<{}> still referenced", name);
    }
}

#[test]
fn failed_pass_leaves_clean_tables() {
    let mut world = answer_world(ChunkConfig::default());
    let first = fire_answer(&mut world);
    world.agent.learn(first).expect("first chunk learned");
    let second = fire_answer(&mut world);
    assert!(world.agent.learn(second).is_err());
    assert_eq!(world.agent.chunker.identities().dirty_count(), 0);
    world.agent.chunker.identities().assert_invariants();
}

#[test]
fn retracted_identities_are_released_at_the_boundary() {
    let mut world = answer_world(ChunkConfig::default());
    let stale = fire_result(&mut world, "stale", "stale");
    world.agent.learn(stale).expect("chunk learned");
    let released = world.agent.trace.inst(stale).condition_identities();
    world.agent.retract_instantiation(stale);
    {
        let identities = world.agent.chunker.identities();
        assert!(released.iter().all(|&id| !identities.is_released(id)));
    }

    let inst = fire_answer(&mut world);
    world.agent.learn(inst).expect("chunk learned");
    let identities = world.agent.chunker.identities();
    assert!(released.iter().all(|&id| identities.is_released(id)));
    identities.assert_invariants();
}

#[test]
fn detailed_sink_sees_the_printed_rule() {
    let (mut world, sink) = recorded(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    world.agent.learn(inst).expect("chunk learned");
    let learned = sink.learned();
    assert_eq!(learned.len(), 1);
    let summary = &learned[0];
    assert_eq!(summary.source, "answer");
    assert_eq!((summary.conditions, summary.actions), (2, 1));
    assert!(summary
        .text
        .as_deref()
        .is_some_and(|text| text.starts_with("sp {chunk-1*d1")));
}

#[test]
fn reinitialize_is_idempotent() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    world.agent.learn(inst).expect("chunk learned");
    world.agent.new_decision_cycle();

    for _ in 0..2 {
        world.agent.reinitialize();
        assert!(world.agent.wm.is_empty());
        assert!(world.agent.trace.is_empty());
        assert_eq!(world.agent.productions.len(), 1);
        assert_eq!(world.agent.decision_cycle(), 1);
        assert_eq!(world.agent.chunker.identities().dirty_count(), 0);
    }

    // Names keep counting after a reinitialize.
    let mut agent = world.agent;
    let s1 = agent.push_goal();
    let s2 = agent.push_goal();
    let x = agent.new_identifier('X');
    let seven = agent.int(7);
    agent.add_wme(s1, "foo", x);
    agent.add_wme(x, "bar", seven);
    let mut world = AnswerWorld {
        agent,
        s1,
        s2,
        x,
        five: seven,
    };
    let inst = fire_answer(&mut world);
    let learned = world.agent.learn(inst).expect("chunk learned");
    assert_eq!(learned.name, "chunk-2*d1");
}

#[test]
fn learn_from_firing_swallows_failures() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    assert!(world.agent.learn_from_firing(inst).is_some());
    let again = fire_answer(&mut world);
    assert!(world.agent.learn_from_firing(again).is_none());
}

// ========== RESULT COLLECTION ==========

#[test]
fn results_include_structure_linked_from_the_superstate() {
    let mut world = answer_world(ChunkConfig::default());
    let (s1, s2) = (world.s1, world.s2);
    let agent = &mut world.agent;
    let item = agent.sym("item");
    let color = agent.sym("color");
    let red = agent.sym("red");
    let inst = agent
        .instantiate("build", s2)
        .prefer(PrefKind::Acceptable, [lit(s1), lit(item), v("new")])
        .fire()
        .expect("fires");
    let new = agent.trace.pref(agent.trace.inst(inst).preferences[0]).value;
    let painter = agent
        .instantiate("paint", s2)
        .prefer(PrefKind::Acceptable, [lit(new), lit(color), lit(red)])
        .fire()
        .expect("fires");

    let results = collect_results(&agent.wm, &agent.trace, inst, 1);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1], agent.trace.inst(painter).preferences[0]);

    agent.retract_instantiation(painter);
    assert_eq!(collect_results(&agent.wm, &agent.trace, inst, 1).len(), 1);
}

#[test]
fn standalone_chunker_runs_against_a_context() {
    let mut world = answer_world(ChunkConfig::default());
    let inst = fire_answer(&mut world);
    let Agent {
        symbols,
        wm,
        trace,
        productions,
        ..
    } = &mut world.agent;
    let mut chunker = Chunker::default();
    let mut sink = crate::explain::NullSink;
    let mut cx = ChunkContext {
        symbols,
        wm,
        trace,
        productions,
        sink: &mut sink,
        decision_cycle: 4,
    };
    let learned = chunker.learn(&mut cx, inst).expect("chunk learned");
    assert_eq!(learned.name, "chunk-1*d4");
    assert_eq!(chunker.stats().chunks, 1);
}
