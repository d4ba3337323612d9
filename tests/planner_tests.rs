use agentfabric::agent::{Agent, AgentError};
use agentfabric::clients::mock::MockClient;
use agentfabric::config::PlannerConfig;
use agentfabric::message::Message;
use agentfabric::planner::{ExecutionStrategy, PlannerAgent, ReasoningPlan};
use agentfabric::runtime::{AgentContext, Runtime};
use agentfabric::AgentDef;
use std::sync::Arc;

fn stub_plan_response() -> String {
    serde_json::json!({
        "analysis": {"type": "design", "domain": "e-commerce"},
        "steps": [
            {
                "step_number": 1,
                "action": "Analyze user behaviour data",
                "prerequisites": [],
                "expected_outcome": "feature set",
                "complexity": "medium",
                "confidence": 0.9,
                "can_parallelize": false
            },
            {
                "step_number": 2,
                "action": "Select recommendation algorithm",
                "prerequisites": [1],
                "expected_outcome": "algorithm choice",
                "complexity": "high",
                "confidence": 0.85,
                "can_parallelize": false
            }
        ],
        "success_criteria": ["click-through improves"]
    })
    .to_string()
}

fn planner_def() -> AgentDef {
    AgentDef::new("brain", "planner")
        .with_model("mock-model")
        .with_prompt("You are a careful planner.")
        .with_input("problems")
        .with_output("plans")
        .with_planner_config(PlannerConfig::default())
}

#[tokio::test]
async fn test_recommendation_system_scenario() {
    let client = MockClient::new("mock-model").with_response(&stub_plan_response());
    let planner = PlannerAgent::from_def(&planner_def(), Arc::new(client)).unwrap();
    let problem = "Design a recommendation system for an e-commerce platform";

    let plan = planner.plan(problem).await.unwrap();
    assert!(plan.critical_path.contains(&1));
    assert_eq!(plan.execution_strategy, ExecutionStrategy::Sequential);
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.steps[1].prerequisites, vec![1]);

    // Second call hits the cache: same object, no further model calls.
    let cached = planner.plan(problem).await.unwrap();
    assert!(Arc::ptr_eq(&plan, &cached));
}

#[tokio::test]
async fn test_execute_requires_started_agent() {
    let client = MockClient::new("mock-model").with_response(&stub_plan_response());
    let planner = PlannerAgent::from_def(&planner_def(), Arc::new(client)).unwrap();

    let msg = Message::new("problem", "anything");
    match planner.execute(AgentContext::detached(), msg).await {
        Err(AgentError::NotReady { agent }) => assert_eq!(agent, "brain"),
        other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test(start_paused = true)]
async fn test_planner_in_a_runtime_pipeline() {
    let client = MockClient::new("mock-model").with_response(&stub_plan_response());
    let runtime = Arc::new(Runtime::new());
    runtime.install_default_factories();
    runtime.register_default_client(Arc::new(client));
    runtime.add_agent(planner_def()).unwrap();

    let mut plans = runtime.fabric().receive("plans").unwrap();
    runtime.start().await.unwrap();

    runtime
        .fabric()
        .send(
            "problems",
            Message::new("problem", "Design a recommendation system").with_id("req-1"),
        )
        .unwrap();

    let out = plans.recv().await.unwrap();
    assert_eq!(out.message_type, "reasoning_plan");
    // The correlation id survives the round trip.
    assert_eq!(out.id, "req-1");
    let plan: ReasoningPlan = serde_json::from_str(&out.payload).unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.planning_strategy, "chain_of_thought");

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_execute_through_started_runtime() {
    let client = MockClient::new("mock-model").with_response(&stub_plan_response());
    let runtime = Arc::new(Runtime::new());
    runtime.install_default_factories();
    runtime.register_default_client(Arc::new(client));
    runtime.add_agent(planner_def()).unwrap();
    runtime.start().await.unwrap();

    let agent = runtime.agent("brain").unwrap();
    let response = agent
        .execute(
            AgentContext::detached(),
            Message::new("problem", "Design a checkout flow").with_id("sync-1"),
        )
        .await
        .unwrap();
    assert_eq!(response.message_type, "reasoning_plan");
    assert_eq!(response.id, "sync-1");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_plan_serialization_round_trip() {
    let client = MockClient::new("mock-model").with_response(&stub_plan_response());
    let planner = PlannerAgent::from_def(&planner_def(), Arc::new(client)).unwrap();
    let plan = planner.plan("round trip me").await.unwrap();

    let json = serde_json::to_string(plan.as_ref()).unwrap();
    let back: ReasoningPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.steps.len(), plan.steps.len());
    assert_eq!(back.problem, plan.problem);
    assert_eq!(back.critical_path, plan.critical_path);
}
