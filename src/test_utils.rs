use crate::agent::Agent;
use crate::builder::{lit, v};
use crate::config::ChunkConfig;
use crate::instantiation::{InstId, PrefKind};
use crate::symbol::SymbolId;

/// Top goal S1 holding `(S1 ^foo X1) (X1 ^bar 5)`, with sub-goal S2 below it.
pub(crate) struct AnswerWorld {
    pub agent: Agent,
    pub s1: SymbolId,
    pub s2: SymbolId,
    pub x: SymbolId,
    pub five: SymbolId,
}

pub(crate) fn answer_world(config: ChunkConfig) -> AnswerWorld {
    let mut agent = Agent::with_config(config);
    let s1 = agent.push_goal();
    let s2 = agent.push_goal();
    let x = agent.new_identifier('X');
    let five = agent.int(5);
    agent.add_wme(s1, "foo", x);
    agent.add_wme(x, "bar", five);
    AnswerWorld {
        agent,
        s1,
        s2,
        x,
        five,
    }
}

/// Fire `answer` in S2:
/// `(S2 ^superstate S1) (S1 ^foo X1) (X1 ^bar 5) --> (S1 ^answer 5 +)`.
pub(crate) fn fire_answer(world: &mut AnswerWorld) -> InstId {
    fire_result(world, "answer", "answer")
}

/// Same matches as `answer`, putting the result on `attr` instead.
pub(crate) fn fire_result(world: &mut AnswerWorld, rule: &str, attr: &str) -> InstId {
    let agent = &mut world.agent;
    let superstate = agent.sym("superstate");
    let foo = agent.sym("foo");
    let bar = agent.sym("bar");
    let result = agent.sym(attr);
    let (s2, five) = (world.s2, world.five);
    agent
        .instantiate(rule, s2)
        .matches([lit(s2), lit(superstate), v("s")])
        .matches([v("s"), lit(foo), v("x")])
        .matches([v("x"), lit(bar), lit(five)])
        .prefer(PrefKind::Acceptable, [v("s"), lit(result), lit(five)])
        .fire()
        .expect("answer matches the fixture")
}

/// Condition and action lines of an installed rule, each sorted.
pub(crate) fn rule_lines(agent: &Agent, name: &str) -> (Vec<String>, Vec<String>) {
    let rule = agent
        .productions
        .by_name(name)
        .unwrap_or_else(|| panic!("{} is installed", name));
    let text = rule.display(&agent.symbols).to_string();
    let body: Vec<&str> = text
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| *line != "}")
        .collect();
    let split = body
        .iter()
        .position(|line| *line == "-->")
        .expect("rule has an arrow");
    let mut conditions: Vec<String> = body[..split].iter().map(|s| s.to_string()).collect();
    let mut actions: Vec<String> = body[split + 1..].iter().map(|s| s.to_string()).collect();
    conditions.sort();
    actions.sort();
    (conditions, actions)
}
