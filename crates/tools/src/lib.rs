//! Built-in tool implementations for Taskloom.
//!
//! Tools give the engines the ability to act on the world: do math,
//! call HTTP endpoints, read files, and search a corpus. Network and
//! retrieval access go through the `HttpClient` and `Retriever` seams
//! from `taskloom-core`, so every tool can run against fakes in tests.

pub mod calculator;
pub mod file_read;
pub mod http_request;
pub mod search;

use std::path::PathBuf;
use std::sync::Arc;

use taskloom_core::http::HttpClient;
use taskloom_core::retrieval::Retriever;
use taskloom_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use file_read::FileReadTool;
pub use http_request::{HttpRequestTool, ReqwestHttpClient};
pub use search::{KeywordRetriever, SearchTool};

/// Create a tool registry with all built-in tools.
///
/// `search` is only registered when a retriever is supplied.
pub fn default_registry(
    http: Arc<dyn HttpClient>,
    retriever: Option<Arc<dyn Retriever>>,
    file_read_roots: Vec<PathBuf>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    registry.register(Box::new(HttpRequestTool::new(http)));
    registry.register(Box::new(FileReadTool::new(file_read_roots)));
    if let Some(retriever) = retriever {
        registry.register(Box::new(SearchTool::new(retriever)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_lists_builtins() {
        let registry = default_registry(Arc::new(ReqwestHttpClient::default()), None, vec![]);
        assert_eq!(registry.names(), vec!["calculator", "http_request", "file_read"]);

        let with_search = default_registry(
            Arc::new(ReqwestHttpClient::default()),
            Some(Arc::new(KeywordRetriever::new())),
            vec![],
        );
        assert!(with_search.get("search").is_some());
        let catalog = with_search.render_catalog();
        assert!(catalog.contains("### math"));
        assert!(catalog.contains("- search:"));
    }

    #[tokio::test]
    async fn registry_runs_calculator() {
        let registry = default_registry(Arc::new(ReqwestHttpClient::default()), None, vec![]);
        let outcome = registry
            .execute("calculator", serde_json::json!({"expression": "6 * 7"}))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output_text(), "42");
    }
}
