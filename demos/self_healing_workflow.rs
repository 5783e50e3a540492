//! A self-healing payment-processor workflow.
//!
//! Wires up a small object graph — a polled health check, an `OnFail`
//! rule, and a recovery action — and drives it through one failure and
//! recovery cycle to show the engine's end-to-end flow: scheduler →
//! sequencer → rule evaluator → RCI → action.
//!
//! Run with `cargo run --example self_healing_workflow`.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swdiag_core::types::Severity;
use swdiag_core::{DiagEngine, EngineConfig, Outcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Self-Healing Payment Processor ===\n");

    let engine = DiagEngine::new(EngineConfig::default());

    // The processor is "up" until the demo flips this flag, simulating
    // an outage; the polled test reports whatever it currently sees.
    let processor_up = Arc::new(AtomicBool::new(true));
    let test_flag = processor_up.clone();

    engine.comp_create("payment_processor")?;

    engine.test_create_polled(
        "payment_health_check",
        Some(Arc::new(move |_instance: &str, _ctx: &serde_json::Value| {
            if test_flag.load(Ordering::SeqCst) {
                Outcome::Pass
            } else {
                Outcome::Fail
            }
        })),
        json!({ "endpoint": "https://payments.internal/health" }),
        swdiag_core::types::period::FAST_MS,
    )?;

    let restarted = Arc::new(AtomicBool::new(false));
    let action_flag = restarted.clone();
    engine.action_create(
        "restart_payment_processor",
        Arc::new(move |_instance: &str, _ctx: &serde_json::Value| {
            action_flag.store(true, Ordering::SeqCst);
            Outcome::Pass
        }),
        serde_json::Value::Null,
    )?;

    engine.rule_create("payment_health_rule", "payment_health_check", Some("restart_payment_processor"))?;
    engine.rule_set_type("payment_health_rule", swdiag_core::RuleOperator::OnFail, 0, 0)?;
    engine.rule_set_severity("payment_health_rule", Severity::Critical)?;

    engine.comp_contains("payment_processor", "payment_health_check")?;
    engine.comp_contains("payment_processor", "payment_health_rule")?;
    engine.comp_contains("payment_processor", "restart_payment_processor")?;

    println!("1. Healthy baseline: health = {}\n", engine.comp_health("payment_processor")?);

    println!("2. Injecting an outage...\n");
    processor_up.store(false, Ordering::SeqCst);
    let dispatched = engine.dispatch_due()?;
    println!("   dispatched {dispatched} due test(s)");

    println!(
        "3. payment_processor health after outage = {}\n",
        engine.comp_health("payment_processor")?
    );
    println!(
        "   restart action ran: {}\n",
        restarted.load(Ordering::SeqCst)
    );

    println!("4. Recovering...\n");
    processor_up.store(true, Ordering::SeqCst);
    engine.dispatch_due()?;

    println!(
        "   payment_processor health after recovery = {}\n",
        engine.comp_health("payment_processor")?
    );

    println!("=== Demonstration complete ===");
    Ok(())
}
