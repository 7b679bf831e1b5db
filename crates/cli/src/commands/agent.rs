//! `taskloom agent`: Answer a task with the ReAct tool loop.

use taskloom_agent::{AgentLoop, AgentRequest, AgentStreamEvent, ExecutionResult, ExecutionStatus};

use super::runtime::{self, CliResult};

pub async fn run(
    task: String,
    context: Option<String>,
    model: Option<String>,
    max_iterations: Option<u32>,
    stream: bool,
) -> CliResult<()> {
    let config = runtime::load_config()?;
    let provider = runtime::require_provider(&config)?;
    let tools = runtime::tool_registry(&config)?;

    let agent = AgentLoop::new(provider, &config.default_model, tools)
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_max_iterations(config.agent.max_iterations)
        .with_exhaustion_policy(config.agent.on_exhaustion);

    let mut request = AgentRequest::new(task);
    if let Some(context) = context {
        request = request.with_context(context);
    }
    if let Some(model) = model {
        request = request.with_model(model);
    }
    if let Some(max) = max_iterations {
        request = request.with_max_iterations(max);
    }

    if stream {
        let mut events = agent.run_stream(request);
        let mut failed = false;
        while let Some(event) = events.recv().await {
            if matches!(
                event,
                AgentStreamEvent::Error { .. }
                    | AgentStreamEvent::Done {
                        status: ExecutionStatus::Failed,
                        ..
                    }
            ) {
                failed = true;
            }
            println!("{}", render_event(&event));
        }
        if failed {
            return Err("Agent run failed".into());
        }
        return Ok(());
    }

    let result = agent.run(request).await;
    print_result(&result);
    match result.status {
        ExecutionStatus::Failed => Err(result
            .error
            .unwrap_or_else(|| "Agent run failed".into())
            .into()),
        _ => Ok(()),
    }
}

fn print_result(result: &ExecutionResult) {
    if !result.answer.is_empty() {
        println!("{}", result.answer);
        println!();
    }
    let marker = match result.status {
        ExecutionStatus::Completed => "✅",
        ExecutionStatus::Inconclusive => "⚠️ ",
        ExecutionStatus::Failed => "❌",
    };
    println!(
        "{marker} {} in {} iteration(s), {} tokens, {} ms",
        result.status, result.iterations, result.total_tokens, result.latency_ms
    );
    if !result.tools_used.is_empty() {
        println!("   Tools: {}", result.tools_used.join(", "));
    }
    if let Some(error) = &result.error {
        println!("   Error: {error}");
    }
}

fn render_event(event: &AgentStreamEvent) -> String {
    match event {
        AgentStreamEvent::Thinking { iteration } => format!("🤔 [{iteration}] thinking..."),
        AgentStreamEvent::ToolCall {
            iteration,
            tool,
            arguments,
        } => format!("🔧 [{iteration}] {tool} {arguments}"),
        AgentStreamEvent::ToolResult {
            iteration,
            tool,
            success,
            output,
        } => {
            let mark = if *success { "✓" } else { "✗" };
            format!("   [{iteration}] {mark} {tool}: {output}")
        }
        AgentStreamEvent::Answer { content } => format!("\n{content}\n"),
        AgentStreamEvent::Done {
            status,
            iterations,
            total_tokens,
            latency_ms,
            ..
        } => format!("{status} in {iterations} iteration(s), {total_tokens} tokens, {latency_ms} ms"),
        AgentStreamEvent::Error { message } => format!("❌ {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tool_events() {
        let call = AgentStreamEvent::ToolCall {
            iteration: 1,
            tool: "calculator".into(),
            arguments: serde_json::json!({"expression": "2+2"}),
        };
        assert!(render_event(&call).contains("calculator"));

        let failed = AgentStreamEvent::ToolResult {
            iteration: 2,
            tool: "nope".into(),
            success: false,
            output: "Tool not found: nope".into(),
        };
        let line = render_event(&failed);
        assert!(line.contains('✗'));
        assert!(line.contains("Tool not found"));
    }
}
