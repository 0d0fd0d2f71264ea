//! End-to-end engine tests
//!
//! Exercises the engine against in-memory registries with scripted handler
//! factories: a manually fireable trigger, comparison and fixed-verdict
//! conditions, and a recording action.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use ra_core::{
    ActionHandler, ConditionHandler, Handler, HandlerError, ModuleHandler, ModuleHandlerFactory,
    ModuleRef, Rule, RuleStatus, RuleStatusDetail, RuleStatusInfo, StatusListener, TriggerCallback,
    TriggerHandler, ValueMap,
};
use ra_engine::{EngineError, RuleEngine};
use ra_registries::{FactoryId, HandlerFactoryRegistry, ModuleTypeRegistry, TemplateRegistry};

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

/// Trigger handler fired manually from the test.
struct ManualTrigger {
    module_id: String,
    callback: Mutex<Option<Arc<dyn TriggerCallback>>>,
}

impl ManualTrigger {
    fn fire(&self, outputs: ValueMap) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback.triggered(&self.module_id, outputs);
        }
    }
}

impl ModuleHandler for ManualTrigger {}

impl TriggerHandler for ManualTrigger {
    fn set_callback(&self, callback: Option<Arc<dyn TriggerCallback>>) {
        *self.callback.lock().unwrap() = callback;
    }
}

/// Condition with a fixed verdict.
struct StaticCondition {
    satisfied: bool,
}

impl ModuleHandler for StaticCondition {}

impl ConditionHandler for StaticCondition {
    fn is_satisfied(&self, _context: &ValueMap) -> bool {
        self.satisfied
    }
}

/// Condition satisfied when its connected input equals the configured
/// constant.
struct EqualsCondition {
    input: String,
    expected: serde_json::Value,
}

impl ModuleHandler for EqualsCondition {}

impl ConditionHandler for EqualsCondition {
    fn is_satisfied(&self, context: &ValueMap) -> bool {
        context.get(&self.input) == Some(&self.expected)
    }
}

/// Action that records the context it was executed with.
struct RecordingAction {
    seen: Arc<Mutex<Vec<ValueMap>>>,
    outputs: Option<ValueMap>,
    delay: Option<Duration>,
}

impl ModuleHandler for RecordingAction {}

impl ActionHandler for RecordingAction {
    fn execute(&self, context: &ValueMap) -> Result<Option<ValueMap>, HandlerError> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.seen.lock().unwrap().push(context.clone());
        Ok(self.outputs.clone())
    }
}

type MakeHandler = Box<dyn Fn(&ModuleRef<'_>, &str) -> Option<Handler> + Send + Sync>;

/// Scriptable handler factory that counts creations and releases.
struct TestFactory {
    types: Vec<String>,
    make: MakeHandler,
    created: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl TestFactory {
    fn new(
        types: &[&str],
        make: impl Fn(&ModuleRef<'_>, &str) -> Option<Handler> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            types: types.iter().map(|t| t.to_string()).collect(),
            make: Box::new(make),
            created: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        })
    }

    fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn released_count(&self) -> usize {
        self.released.lock().unwrap().len()
    }
}

impl ModuleHandlerFactory for TestFactory {
    fn module_types(&self) -> Vec<String> {
        self.types.clone()
    }

    fn create_handler(&self, module: &ModuleRef<'_>, rule_uid: &str) -> Option<Handler> {
        let handler = (self.make)(module, rule_uid);
        if handler.is_some() {
            self.created
                .lock()
                .unwrap()
                .push(module.type_uid().to_string());
        }
        handler
    }

    fn release_handler(&self, module: &ModuleRef<'_>, _rule_uid: &str, _handler: Handler) {
        self.released
            .lock()
            .unwrap()
            .push(module.type_uid().to_string());
    }
}

/// Records every status transition published by the engine.
#[derive(Default)]
struct StatusRecorder {
    events: Mutex<Vec<(String, RuleStatusInfo)>>,
}

impl StatusRecorder {
    fn statuses(&self, uid: &str) -> Vec<RuleStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(rule_uid, _)| rule_uid == uid)
            .map(|(_, info)| info.status)
            .collect()
    }
}

impl StatusListener for StatusRecorder {
    fn status_changed(&self, rule_uid: &str, info: &RuleStatusInfo) {
        self.events
            .lock()
            .unwrap()
            .push((rule_uid.to_string(), info.clone()));
    }
}

struct Fixture {
    module_types: Arc<ModuleTypeRegistry>,
    templates: Arc<TemplateRegistry>,
    factories: Arc<HandlerFactoryRegistry>,
    engine: Arc<RuleEngine>,
}

fn setup() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let module_types = Arc::new(ModuleTypeRegistry::new());
    let templates = Arc::new(TemplateRegistry::new());
    let factories = Arc::new(HandlerFactoryRegistry::new());
    let engine = RuleEngine::new(module_types.clone(), templates.clone(), factories.clone());
    engine.start();
    Fixture {
        module_types,
        templates,
        factories,
        engine,
    }
}

/// Factory producing [`ManualTrigger`]s for the given type, exposing every
/// handler it created so tests can fire them.
fn trigger_factory(
    type_uid: &str,
    fixture: &Fixture,
) -> (FactoryId, Arc<TestFactory>, Arc<Mutex<Vec<Arc<ManualTrigger>>>>) {
    let handlers: Arc<Mutex<Vec<Arc<ManualTrigger>>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = handlers.clone();
    let factory = TestFactory::new(&[type_uid], move |module, _rule_uid| match module {
        ModuleRef::Trigger(_) => {
            let handler = Arc::new(ManualTrigger {
                module_id: module.id().to_string(),
                callback: Mutex::new(None),
            });
            captured.lock().unwrap().push(handler.clone());
            Some(Handler::Trigger(handler))
        }
        _ => None,
    });
    let id = fixture.factories.add(factory.clone());
    (id, factory, handlers)
}

/// Factory producing [`RecordingAction`]s for the given type. Also captures
/// the configuration of every module it served.
#[allow(clippy::type_complexity)]
fn action_factory(
    type_uid: &str,
    fixture: &Fixture,
    outputs: Option<ValueMap>,
    delay: Option<Duration>,
) -> (
    FactoryId,
    Arc<TestFactory>,
    Arc<Mutex<Vec<ValueMap>>>,
    Arc<Mutex<Vec<ValueMap>>>,
) {
    let seen: Arc<Mutex<Vec<ValueMap>>> = Arc::new(Mutex::new(Vec::new()));
    let configs: Arc<Mutex<Vec<ValueMap>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_captured = seen.clone();
    let configs_captured = configs.clone();
    let factory = TestFactory::new(&[type_uid], move |module, _rule_uid| match module {
        ModuleRef::Action(_) => {
            configs_captured
                .lock()
                .unwrap()
                .push(module.configuration().clone());
            Some(Handler::Action(Arc::new(RecordingAction {
                seen: seen_captured.clone(),
                outputs: outputs.clone(),
                delay,
            })))
        }
        _ => None,
    });
    let id = fixture.factories.add(factory.clone());
    (id, factory, seen, configs)
}

/// Factory building [`EqualsCondition`]s from module configuration
/// (`input` names the context key, `expected` the value to match).
fn equals_condition_factory(type_uid: &str, fixture: &Fixture) -> FactoryId {
    let factory = TestFactory::new(&[type_uid], |module, _rule_uid| match module {
        ModuleRef::Condition(_) => {
            let input = module.configuration().get("input")?.as_str()?.to_string();
            let expected = module.configuration().get("expected")?.clone();
            Some(Handler::Condition(Arc::new(EqualsCondition {
                input,
                expected,
            })))
        }
        _ => None,
    });
    fixture.factories.add(factory)
}

fn condition_factory(type_uid: &str, fixture: &Fixture, satisfied: bool) -> FactoryId {
    let factory = TestFactory::new(&[type_uid], move |module, _rule_uid| match module {
        ModuleRef::Condition(_) => Some(Handler::Condition(Arc::new(StaticCondition { satisfied }))),
        _ => None,
    });
    fixture.factories.add(factory)
}

fn values(entries: &[(&str, serde_json::Value)]) -> ValueMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn trigger_action_rule(uid: Option<&str>) -> Rule {
    serde_json::from_value(json!({
        "uid": uid,
        "triggers": [
            {"id": "t", "type_uid": "sys_trigger"}
        ],
        "actions": [
            {
                "id": "a",
                "type_uid": "sys_action",
                "connections": [
                    {"input_name": "v", "source_module_id": "t", "output_name": "x"}
                ]
            }
        ]
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_happy_path_trigger_to_action() {
    let fixture = setup();
    let recorder = Arc::new(StatusRecorder::default());
    fixture.engine.set_status_listener(Some(recorder.clone()));

    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(42))]));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("v"), Some(&json!(42)));
    // The staged trigger output is visible in the merged context too.
    assert_eq!(seen[0].get("t.x"), Some(&json!(42)));

    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));
    assert_eq!(
        recorder.statuses(&uid),
        vec![
            RuleStatus::NotInitialized,
            RuleStatus::Idle,
            RuleStatus::Running,
            RuleStatus::Idle,
        ]
    );
}

#[test]
fn test_missing_handler_then_factory_arrives() {
    let fixture = setup();

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "missing"}]
    }))
    .unwrap();
    let uid = fixture.engine.add_rule(rule).unwrap();

    let info = fixture.engine.status_info(&uid).unwrap();
    assert_eq!(info.status, RuleStatus::NotInitialized);
    assert_eq!(info.detail, Some(RuleStatusDetail::HandlerInitializingError));
    assert!(info.description.unwrap().contains("missing"));

    // The factory arrival alone drives the rule to IDLE.
    trigger_factory("missing", &fixture);
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));
}

#[test]
fn test_factory_disappearance_tears_rule_down() {
    let fixture = setup();
    let (_, trigger_fac, triggers) = trigger_factory("sys_trigger", &fixture);
    let (action_id, action_fac, seen, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));

    assert!(fixture.factories.remove(action_id));

    let info = fixture.engine.status_info(&uid).unwrap();
    assert_eq!(info.status, RuleStatus::NotInitialized);
    assert_eq!(info.detail, Some(RuleStatusDetail::HandlerMissing));
    assert!(info.description.unwrap().contains("sys_action"));

    // Both handlers were returned to their factories.
    assert_eq!(trigger_fac.released_count(), 1);
    assert_eq!(action_fac.released_count(), 1);

    // The trigger callback is severed; a late firing executes nothing.
    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(1))]));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(
        fixture.engine.status(&uid),
        Some(RuleStatus::NotInitialized)
    );
}

#[test]
fn test_template_bound_rule() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, configs) = action_factory("sys_action", &fixture, None, None);

    let rule: Rule = serde_json::from_value(json!({
        "uid": "greeter",
        "template_uid": "tpl",
        "configuration": {"greeting": "hi"}
    }))
    .unwrap();
    fixture.engine.add_rule(rule).unwrap();

    let info = fixture.engine.status_info("greeter").unwrap();
    assert_eq!(info.status, RuleStatus::NotInitialized);
    assert_eq!(info.detail, Some(RuleStatusDetail::TemplateMissing));

    fixture.templates.add(
        serde_json::from_value(json!({
            "uid": "tpl",
            "triggers": [{"id": "t", "type_uid": "sys_trigger"}],
            "actions": [
                {
                    "id": "a",
                    "type_uid": "sys_action",
                    "configuration": {"message": "${greeting} there"}
                }
            ]
        }))
        .unwrap(),
    );

    assert_eq!(fixture.engine.status("greeter"), Some(RuleStatus::Idle));
    // The materialized action saw the substituted configuration.
    assert_eq!(
        configs.lock().unwrap()[0].get("message"),
        Some(&json!("hi there"))
    );

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(ValueMap::new());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_template_substitution_error() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    fixture.templates.add(
        serde_json::from_value(json!({
            "uid": "tpl",
            "triggers": [
                {"id": "t", "type_uid": "sys_trigger", "configuration": {"time": "${when}"}}
            ]
        }))
        .unwrap(),
    );

    let rule: Rule = serde_json::from_value(json!({
        "uid": "broken",
        "template_uid": "tpl"
    }))
    .unwrap();
    fixture.engine.add_rule(rule).unwrap();

    let info = fixture.engine.status_info("broken").unwrap();
    assert_eq!(info.status, RuleStatus::NotInitialized);
    assert_eq!(info.detail, Some(RuleStatusDetail::ConfigurationError));
    assert!(info.description.unwrap().contains("when"));
}

#[test]
fn test_unsatisfied_condition_blocks_actions() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);
    condition_factory("sys_condition", &fixture, false);

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "sys_trigger"}],
        "conditions": [{"id": "c", "type_uid": "sys_condition"}],
        "actions": [{"id": "a", "type_uid": "sys_action"}]
    }))
    .unwrap();
    let uid = fixture.engine.add_rule(rule).unwrap();

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(42))]));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));
    // Only the trigger outputs made it into the execution context.
    let context = fixture.engine.execution_context(&uid).unwrap();
    assert_eq!(context, values(&[("t.x", json!(42))]));
}

#[test]
fn test_condition_gates_on_connected_input() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);
    equals_condition_factory("sys_equals", &fixture);

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "sys_trigger"}],
        "conditions": [
            {
                "id": "c",
                "type_uid": "sys_equals",
                "configuration": {"input": "value", "expected": 42},
                "connections": [
                    {"input_name": "value", "source_module_id": "t", "output_name": "x"}
                ]
            }
        ],
        "actions": [{"id": "a", "type_uid": "sys_action"}]
    }))
    .unwrap();
    fixture.engine.add_rule(rule).unwrap();

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(7))]));
    assert!(seen.lock().unwrap().is_empty());

    // The cached output reference tracks the latest firing's value.
    trigger.fire(values(&[("x", json!(42))]));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_second_firing_while_running_is_dropped() {
    let fixture = setup();
    let recorder = Arc::new(StatusRecorder::default());
    fixture.engine.set_status_listener(Some(recorder.clone()));

    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) =
        action_factory("sys_action", &fixture, None, Some(Duration::from_millis(300)));

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    let trigger = triggers.lock().unwrap()[0].clone();

    let first = {
        let trigger = trigger.clone();
        thread::spawn(move || trigger.fire(values(&[("x", json!(1))])))
    };
    // Let the first firing reach its slow action, then fire again.
    thread::sleep(Duration::from_millis(100));
    trigger.fire(values(&[("x", json!(2))]));
    first.join().unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(
        recorder.statuses(&uid),
        vec![
            RuleStatus::NotInitialized,
            RuleStatus::Idle,
            RuleStatus::Running,
            RuleStatus::Idle,
        ]
    );
}

// ---------------------------------------------------------------------------
// invariants and registry-core behavior
// ---------------------------------------------------------------------------

#[test]
fn test_action_outputs_feed_later_actions() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, first_seen, _) = action_factory(
        "sys_producer",
        &fixture,
        Some(values(&[("result", json!("made"))])),
        None,
    );
    let (_, _, second_seen, _) = action_factory("sys_consumer", &fixture, None, None);

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "sys_trigger"}],
        "actions": [
            {"id": "first", "type_uid": "sys_producer"},
            {
                "id": "second",
                "type_uid": "sys_consumer",
                "connections": [
                    {"input_name": "in", "source_module_id": "first", "output_name": "result"}
                ]
            }
        ]
    }))
    .unwrap();
    let uid = fixture.engine.add_rule(rule).unwrap();

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(ValueMap::new());

    assert_eq!(first_seen.lock().unwrap().len(), 1);
    let second = second_seen.lock().unwrap();
    assert_eq!(second[0].get("in"), Some(&json!("made")));
    assert_eq!(second[0].get("first.result"), Some(&json!("made")));

    let context = fixture.engine.execution_context(&uid).unwrap();
    assert_eq!(context.get("first.result"), Some(&json!("made")));
}

#[test]
fn test_failing_action_does_not_abort_rule() {
    struct FailingAction;

    impl ModuleHandler for FailingAction {}

    impl ActionHandler for FailingAction {
        fn execute(&self, _context: &ValueMap) -> Result<Option<ValueMap>, HandlerError> {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    fixture
        .factories
        .add(TestFactory::new(&["sys_fail"], |module, _| {
            matches!(module, ModuleRef::Action(_))
                .then(|| Handler::Action(Arc::new(FailingAction)))
        }));
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "sys_trigger"}],
        "actions": [
            {"id": "bad", "type_uid": "sys_fail"},
            {"id": "good", "type_uid": "sys_action"}
        ]
    }))
    .unwrap();
    let uid = fixture.engine.add_rule(rule).unwrap();

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(ValueMap::new());

    // The failing action is logged and skipped; the next action still ran.
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));
}

#[test]
fn test_composite_type_routes_through_system_factory() {
    let fixture = setup();
    let (_, system_fac, triggers) = trigger_factory("sys_trigger", &fixture);

    // A decoy claiming the full composite UID must never be consulted.
    let decoy = TestFactory::new(&["sys_trigger:custom"], |_, _| None);
    fixture.factories.add(decoy.clone());

    fixture.module_types.add(
        serde_json::from_value(json!({
            "uid": "sys_trigger:custom",
            "kind": "trigger",
            "configuration": {"preset": "yes"}
        }))
        .unwrap(),
    );

    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": "sys_trigger:custom"}]
    }))
    .unwrap();
    let uid = fixture.engine.add_rule(rule).unwrap();
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));

    // The system factory saw the rewritten module, the decoy saw nothing.
    assert_eq!(
        *system_fac.created.lock().unwrap(),
        vec!["sys_trigger".to_string()]
    );
    assert_eq!(decoy.created_count(), 0);
    assert_eq!(triggers.lock().unwrap().len(), 1);
}

#[test]
fn test_defensive_copies() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    let rule: Rule = serde_json::from_value(json!({
        "uid": "copied",
        "triggers": [{"id": "t", "type_uid": "sys_trigger"}]
    }))
    .unwrap();
    fixture.engine.add_rule(rule).unwrap();

    let mut copy = fixture.engine.rule("copied").unwrap();
    copy.triggers[0].type_uid = "mutated".into();
    copy.tags.insert("mutated".into());

    let stored = fixture.engine.rule("copied").unwrap();
    assert_eq!(stored.triggers[0].type_uid, "sys_trigger");
    assert!(stored.tags.is_empty());
}

#[test]
fn test_duplicate_uid_rejected_without_mutation() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    let uid = fixture
        .engine
        .add_rule(trigger_action_rule(Some("dup")))
        .unwrap();
    let status_before = fixture.engine.status_info(&uid);

    let err = fixture
        .engine
        .add_rule(trigger_action_rule(Some("dup")))
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRule(u) if u == "dup"));

    assert_eq!(fixture.engine.status_info(&uid), status_before);
    assert_eq!(fixture.engine.rules().len(), 1);
}

#[test]
fn test_remove_clears_every_trace() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(1))]));
    assert_eq!(seen.lock().unwrap().len(), 1);

    assert!(fixture.engine.remove_rule(&uid));
    assert!(!fixture.engine.remove_rule(&uid));
    assert!(fixture.engine.rule(&uid).is_none());
    assert!(fixture.engine.status(&uid).is_none());
    assert!(fixture.engine.execution_context(&uid).is_none());

    // The severed callback drops late firings instead of executing.
    trigger.fire(values(&[("x", json!(2))]));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_generated_uids_are_strictly_increasing() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    let first = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(first, "rule_1");

    // An explicit UID in the same namespace advances the counter past it.
    fixture
        .engine
        .add_rule(trigger_action_rule(Some("rule_7")))
        .unwrap();
    let next = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(next, "rule_8");

    // Removal never hands a suffix back out.
    assert!(fixture.engine.remove_rule(&next));
    let after_remove = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(after_remove, "rule_9");
}

#[test]
fn test_tag_queries() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    let mut morning = trigger_action_rule(Some("morning"));
    morning.tags = ["dawn".to_string(), "light".to_string()].into_iter().collect();
    let mut evening = trigger_action_rule(Some("evening"));
    evening.tags = ["dusk".to_string()].into_iter().collect();
    fixture.engine.add_rule(morning).unwrap();
    fixture.engine.add_rule(evening).unwrap();

    assert_eq!(fixture.engine.rules_by_tag("dawn").len(), 1);
    assert_eq!(fixture.engine.rules_by_tag("none").len(), 0);

    let any_of: HashSet<String> = ["dusk".to_string(), "light".to_string()].into_iter().collect();
    let matched = fixture.engine.rules_by_tags(&any_of);
    assert_eq!(matched.len(), 2);
    assert!(fixture.engine.rules_by_tags(&HashSet::new()).is_empty());
}

#[test]
fn test_disable_and_enable() {
    let fixture = setup();
    let (_, _, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, _, seen, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    let trigger = triggers.lock().unwrap()[0].clone();

    fixture.engine.set_enabled(&uid, false).unwrap();
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Disabled));
    trigger.fire(values(&[("x", json!(1))]));
    assert!(seen.lock().unwrap().is_empty());

    fixture.engine.set_enabled(&uid, true).unwrap();
    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));

    // Enabling binds fresh handlers; fire the new one.
    let trigger = triggers.lock().unwrap().last().unwrap().clone();
    trigger.fire(values(&[("x", json!(2))]));
    assert_eq!(seen.lock().unwrap().len(), 1);

    assert!(matches!(
        fixture.engine.set_enabled("ghost", true),
        Err(EngineError::RuleNotFound(_))
    ));
}

#[test]
fn test_update_rebinds_with_fresh_handlers() {
    let fixture = setup();
    let (_, trigger_fac, _) = trigger_factory("sys_trigger", &fixture);
    let (_, action_fac, _, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    assert_eq!(trigger_fac.created_count(), 1);

    let mut updated = fixture.engine.rule(&uid).unwrap();
    updated.actions.clear();
    fixture.engine.update_rule(updated).unwrap();

    assert_eq!(fixture.engine.status(&uid), Some(RuleStatus::Idle));
    // The old activation's handlers went back to their factories and a new
    // trigger handler was produced.
    assert_eq!(trigger_fac.released_count(), 1);
    assert_eq!(action_fac.released_count(), 1);
    assert_eq!(trigger_fac.created_count(), 2);

    assert!(matches!(
        fixture.engine.update_rule(trigger_action_rule(None)),
        Err(EngineError::MissingUid)
    ));
}

#[test]
fn test_scope_identifiers() {
    let fixture = setup();
    trigger_factory("sys_trigger", &fixture);

    fixture
        .engine
        .add_rule_scoped(trigger_action_rule(Some("a")), Some("kitchen"))
        .unwrap();
    fixture
        .engine
        .add_rule_scoped(trigger_action_rule(Some("b")), Some("garden"))
        .unwrap();
    fixture
        .engine
        .add_rule(trigger_action_rule(Some("c")))
        .unwrap();

    let scopes = fixture.engine.scope_identifiers();
    assert_eq!(scopes.len(), 2);
    assert!(scopes.contains("kitchen"));
    assert!(scopes.contains("garden"));
}

#[test]
fn test_dispose_is_terminal() {
    let fixture = setup();
    let (_, trigger_fac, triggers) = trigger_factory("sys_trigger", &fixture);
    let (_, action_fac, seen, _) = action_factory("sys_action", &fixture, None, None);

    let uid = fixture.engine.add_rule(trigger_action_rule(None)).unwrap();
    fixture.engine.dispose();

    // Handlers were returned through their factories.
    assert_eq!(trigger_fac.released_count(), 1);
    assert_eq!(action_fac.released_count(), 1);
    assert!(fixture.engine.status(&uid).is_none());
    assert!(fixture.engine.rules().is_empty());

    let trigger = triggers.lock().unwrap()[0].clone();
    trigger.fire(values(&[("x", json!(1))]));
    assert!(seen.lock().unwrap().is_empty());

    assert!(matches!(
        fixture.engine.add_rule(trigger_action_rule(None)),
        Err(EngineError::Disposed)
    ));
    assert!(!fixture.engine.remove_rule(&uid));

    // A factory arriving after dispose is ignored.
    trigger_factory("late", &fixture);
    assert!(fixture.engine.rules().is_empty());

    // Disposing again is a no-op.
    fixture.engine.dispose();
}

#[test]
fn test_invalid_rule_rejected_at_add() {
    let fixture = setup();
    let rule: Rule = serde_json::from_value(json!({
        "triggers": [{"id": "t", "type_uid": ""}]
    }))
    .unwrap();
    assert!(matches!(
        fixture.engine.add_rule(rule),
        Err(EngineError::InvalidRule(_))
    ));
    assert!(fixture.engine.rules().is_empty());
}
