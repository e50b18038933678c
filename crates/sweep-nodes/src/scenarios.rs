//! End-to-end runs combining the engine with the built-in node kinds

use std::sync::Arc;

use serde_json::json;
use sweep_engine::{
    CacheStore, ExecutionFailure, Field, FieldSpec, FieldType, FnExecutor, JoinSpec, MemoryCache,
    Node, NodeExecutor, NodeRegistry, NodeStatus, ValueMap, Workflow, WorkflowBuilder, WorkflowDef,
};

use crate::identity;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn int(inputs: &ValueMap, field: &str) -> i64 {
    inputs.get(field).and_then(|v| v.as_i64()).unwrap_or_default()
}

fn ints(inputs: &ValueMap, field: &str) -> Vec<i64> {
    inputs
        .get(field)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default()
}

fn increment() -> Arc<dyn NodeExecutor> {
    let spec = FieldSpec::new(
        vec![
            Field::required("input1", FieldType::Int),
            Field::optional("inc", FieldType::Int).with_default(json!(1)),
        ],
        vec![Field::optional("output1", FieldType::Int)],
    );
    FnExecutor::new("increment", spec, |inputs| {
        let value = int(inputs, "input1") + int(inputs, "inc");
        Ok(ValueMap::from([("output1".to_string(), json!(value))]))
    })
    .shared()
}

/// Sums its operands and echoes them back
fn sum() -> Arc<dyn NodeExecutor> {
    let spec = FieldSpec::new(
        vec![Field::required("input1", FieldType::list(FieldType::Int))],
        vec![
            Field::optional("output1", FieldType::Int),
            Field::optional("operands", FieldType::list(FieldType::Int)),
        ],
    );
    FnExecutor::new("sum", spec, |inputs| {
        let operands = ints(inputs, "input1");
        Ok(ValueMap::from([
            ("output1".to_string(), json!(operands.iter().sum::<i64>())),
            ("operands".to_string(), json!(operands)),
        ]))
    })
    .shared()
}

fn set_len() -> Arc<dyn NodeExecutor> {
    let spec = FieldSpec::new(
        vec![Field::required("input1", FieldType::set(FieldType::Int))],
        vec![Field::optional("output1", FieldType::Int)],
    );
    FnExecutor::new("set_len", spec, |inputs| {
        Ok(ValueMap::from([(
            "output1".to_string(),
            json!(ints(inputs, "input1").len()),
        )]))
    })
    .shared()
}

fn product() -> Arc<dyn NodeExecutor> {
    let spec = FieldSpec::new(
        vec![
            Field::required("input1", FieldType::Int),
            Field::required("input2", FieldType::Int),
        ],
        vec![Field::optional("output1", FieldType::Int)],
    );
    FnExecutor::new("product", spec, |inputs| {
        let value = int(inputs, "input1") * int(inputs, "input2");
        Ok(ValueMap::from([("output1".to_string(), json!(value))]))
    })
    .shared()
}

/// Passes `input1` through, failing on one specific value
fn fail_on(bad: i64) -> Arc<dyn NodeExecutor> {
    let spec = FieldSpec::new(
        vec![Field::required("input1", FieldType::Int)],
        vec![Field::optional("output1", FieldType::Int)],
    );
    FnExecutor::new("fail_on", spec, move |inputs| {
        let value = int(inputs, "input1");
        if value == bad {
            return Err(ExecutionFailure::failed(format!("refusing {}", value)));
        }
        Ok(ValueMap::from([("output1".to_string(), json!(value))]))
    })
    .shared()
}

/// inputspec(n) -> pre_join1 -> pre_join2 -> join(sum) -> post_join1
///                     \----------------------------\-> post_join2(product)
fn join_expansion() -> Workflow {
    let mut workflow = Workflow::new("join_expansion");
    workflow
        .add_node(Node::new("inputspec", identity(&["n"])).with_iterable("n", vec![json!(1), json!(2)]))
        .unwrap();
    workflow.add_node(Node::new("pre_join1", increment())).unwrap();
    workflow.add_node(Node::new("pre_join2", increment())).unwrap();
    workflow
        .add_node(Node::join("join", sum(), JoinSpec::new("inputspec").field("input1")))
        .unwrap();
    workflow.add_node(Node::new("post_join1", increment())).unwrap();
    workflow.add_node(Node::new("post_join2", product())).unwrap();

    workflow.connect("inputspec", "n", "pre_join1", "input1").unwrap();
    workflow.connect("pre_join1", "output1", "pre_join2", "input1").unwrap();
    workflow.connect("pre_join2", "output1", "join", "input1").unwrap();
    workflow.connect("join", "output1", "post_join1", "input1").unwrap();
    workflow.connect("join", "output1", "post_join2", "input1").unwrap();
    workflow.connect("pre_join1", "output1", "post_join2", "input2").unwrap();
    workflow
}

#[tokio::test]
async fn test_join_expansion() {
    init_logging();
    let report = join_expansion().run().await.unwrap();

    assert!(report.is_success());
    // the iterable holder is elided
    assert_eq!(report.graph.len(), 8);
    assert_eq!(report.output("join", "operands"), Some(&json!([3, 4])));
    assert_eq!(report.output("join", "output1"), Some(&json!(7)));
    assert_eq!(report.graph.instances_of("post_join1").count(), 1);
    assert_eq!(report.output("post_join1", "output1"), Some(&json!(8)));
    assert_eq!(
        report.outputs_for("post_join2", "output1"),
        vec![&json!(14), &json!(21)]
    );
}

#[tokio::test]
async fn test_set_join() {
    let graph = WorkflowBuilder::new("set_join")
        .node("inputspec", identity(&["n"]))
        .iterables("n", vec![json!(1), json!(2), json!(1), json!(3), json!(2)])
        .node("pre_join1", increment())
        .join_node("join", set_len(), JoinSpec::new("inputspec").field("input1"))
        .connect("inputspec", "n", "pre_join1", "input1")
        .connect("pre_join1", "output1", "join", "input1")
        .build()
        .unwrap();

    let report = Workflow::from_graph(graph).run().await.unwrap();
    assert_eq!(report.output("join", "output1"), Some(&json!(3)));
}

#[tokio::test]
async fn test_unique_join() {
    let graph = WorkflowBuilder::new("unique_join")
        .node("inputspec", identity(&["n"]))
        .iterables("n", vec![json!(3), json!(1), json!(2), json!(1), json!(3)])
        .node("pre_join1", increment())
        .join_node("join", sum(), JoinSpec::new("inputspec").field("input1").unique())
        .connect("inputspec", "n", "pre_join1", "input1")
        .connect("pre_join1", "output1", "join", "input1")
        .build()
        .unwrap();

    let report = Workflow::from_graph(graph).run().await.unwrap();
    assert_eq!(report.output("join", "operands"), Some(&json!([4, 2, 3])));
    assert_eq!(report.output("join", "output1"), Some(&json!(9)));
}

#[tokio::test]
async fn test_identity_join() {
    let graph = WorkflowBuilder::new("identity_join")
        .node("inputspec", identity(&["n"]))
        .iterables("n", vec![json!(1), json!(2), json!(3)])
        .node("pre_join1", increment())
        .join_node("join", identity(&["vector"]), JoinSpec::new("inputspec").field("vector"))
        .node("post_join1", sum())
        .connect("inputspec", "n", "pre_join1", "input1")
        .connect("pre_join1", "output1", "join", "vector")
        .connect("join", "vector", "post_join1", "input1")
        .build()
        .unwrap();

    let report = Workflow::from_graph(graph).run().await.unwrap();
    // the gathering identity join is kept
    assert_eq!(report.graph.len(), 5);
    assert_eq!(report.output("post_join1", "operands"), Some(&json!([2, 3, 4])));
}

#[tokio::test]
async fn test_multifield_join() {
    let mut workflow = Workflow::new("multifield_join");
    workflow
        .add_node(Node::new("inputspec", identity(&["m", "n"])))
        .unwrap();
    workflow
        .add_iterable("inputspec", "m", vec![json!(1), json!(2)])
        .unwrap();
    workflow
        .add_iterable("inputspec", "n", vec![json!(3), json!(4)])
        .unwrap();
    workflow.add_node(Node::new("inc1", increment())).unwrap();
    workflow.add_node(Node::new("inc2", increment())).unwrap();
    // no join fields declared: every input is joined
    workflow
        .add_node(Node::join(
            "join",
            identity(&["vector1", "vector2"]),
            JoinSpec::new("inputspec"),
        ))
        .unwrap();
    workflow
        .add_node(Node::map(
            "prod",
            product(),
            vec!["input1".to_string(), "input2".to_string()],
        ))
        .unwrap();

    workflow.connect("inputspec", "m", "inc1", "input1").unwrap();
    workflow.connect("inputspec", "n", "inc2", "input1").unwrap();
    workflow.connect("inc1", "output1", "join", "vector1").unwrap();
    workflow.connect("inc2", "output1", "join", "vector2").unwrap();
    workflow.connect("join", "vector1", "prod", "input1").unwrap();
    workflow.connect("join", "vector2", "prod", "input2").unwrap();

    let report = workflow.run().await.unwrap();
    assert_eq!(report.graph.len(), 10);
    assert_eq!(report.graph.instances_of("inc1").count(), 4);
    assert_eq!(report.output("join", "vector1"), Some(&json!([2, 2, 3, 3])));
    assert_eq!(report.output("join", "vector2"), Some(&json!([4, 5, 4, 5])));
    assert_eq!(report.output("prod", "output1"), Some(&json!([8, 10, 12, 15])));
}

#[tokio::test]
async fn test_rerun_hits_cache_for_every_node() {
    let workflow = join_expansion();
    let first = workflow.run().await.unwrap();
    let second = workflow.run().await.unwrap();

    assert_eq!(first.summary().executed, 8);
    assert_eq!(second.summary().executed, 0);
    assert_eq!(second.summary().cache_hits, 8);
    assert_eq!(first.outputs, second.outputs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_backend_matches_inline() {
    let inline_store = Arc::new(MemoryCache::new());
    let parallel_store = Arc::new(MemoryCache::new());

    let inline = join_expansion()
        .with_cache_store(inline_store.clone())
        .run()
        .await
        .unwrap();
    let parallel = join_expansion()
        .parallel()
        .with_cache_store(parallel_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(inline.statuses, parallel.statuses);
    assert_eq!(inline.outputs, parallel.outputs);
    assert_eq!(inline_store.len(), 8);
    assert_eq!(inline_store.keys(), parallel_store.keys());
    for key in inline_store.keys() {
        assert_eq!(
            inline_store.get(&key).unwrap(),
            parallel_store.get(&key).unwrap(),
            "cache entry {} differs between backends",
            key
        );
    }
}

#[tokio::test]
async fn test_failure_blocks_only_dependents() {
    let mut workflow = Workflow::new("isolation");
    workflow
        .add_node(Node::new("inputspec", identity(&["n"])).with_iterable("n", vec![json!(1), json!(2)]))
        .unwrap();
    workflow.add_node(Node::new("pre", increment())).unwrap();
    workflow.add_node(Node::new("check", fail_on(3))).unwrap();
    workflow.add_node(Node::new("post", increment())).unwrap();
    workflow.add_node(Node::new("other", increment())).unwrap();
    workflow.set_input("other", "input1", json!(10)).unwrap();
    workflow.connect("inputspec", "n", "pre", "input1").unwrap();
    workflow.connect("pre", "output1", "check", "input1").unwrap();
    workflow.connect("check", "output1", "post", "input1").unwrap();

    let report = workflow.run().await.unwrap();

    assert_eq!(report.failed(), vec!["check[inputspec=1]"]);
    assert_eq!(report.blocked(), vec!["post[inputspec=1]"]);
    assert_eq!(
        report.status("post[inputspec=1]"),
        Some(&NodeStatus::Blocked {
            cause: "check[inputspec=1]".to_string()
        })
    );
    assert_eq!(report.output("post[inputspec=0]", "output1"), Some(&json!(3)));
    assert_eq!(report.output("other", "output1"), Some(&json!(11)));
    assert_eq!(report.summary().executed, 5);
}

#[tokio::test]
async fn test_definition_with_builtin_kinds() {
    let mut registry = NodeRegistry::with_builtins();
    registry.register_executor("increment", increment());

    let def = WorkflowDef::from_json_str(
        r#"{
            "name": "gather",
            "nodes": [
                { "id": "inputspec", "kind": "identity", "params": { "fields": ["n"] },
                  "iterables": [{ "field": "n", "values": [1, 2, 3] }] },
                { "id": "inc", "kind": "increment" },
                { "id": "gather", "kind": "merge", "params": { "numinputs": 1, "ravel": true },
                  "join": { "source": "inputspec", "fields": ["in1"] } },
                { "id": "pick", "kind": "select", "inputs": { "index": [0, 2] } }
            ],
            "edges": [
                { "from": "inputspec.n", "to": "inc.input1" },
                { "from": "inc.output1", "to": "gather.in1" },
                { "from": "gather.out", "to": "pick.inlist" }
            ]
        }"#,
    )
    .unwrap();

    let report = Workflow::from_definition(&def, &registry)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(report.graph.len(), 5);
    assert_eq!(report.output("gather", "out"), Some(&json!([2, 3, 4])));
    assert_eq!(report.output("pick", "out"), Some(&json!([2, 4])));
}
