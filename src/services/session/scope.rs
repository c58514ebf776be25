//! Request Context Scope
//!
//! Carries the identity of the request that started a Work into every
//! descendant await point of that Work's task, without threading it through
//! each call. Contexts are per task: concurrent Works never observe each
//! other's values.

use std::future::Future;

use autoprovider_core::SessionContext;

/// Identity of the request driving the current task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_id: String,
    pub session_id: String,
    pub work_id: String,
    pub project_id: String,
}

impl RequestContext {
    pub fn new(
        client_id: impl Into<String>,
        session_id: impl Into<String>,
        work_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            session_id: session_id.into(),
            work_id: work_id.into(),
            project_id: project_id.into(),
        }
    }

    /// Tool-facing view of this context.
    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(&self.session_id, &self.work_id, &self.project_id)
            .with_client_id(&self.client_id)
    }
}

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` attached; the context is dropped when `fut` completes.
pub async fn scope<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// Context of the current task, if it runs inside `scope`.
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(session: &str) -> RequestContext {
        RequestContext::new(format!("client-{session}"), session, "w1", "p1")
    }

    #[tokio::test]
    async fn test_current_inside_scope() {
        assert!(current().is_none());
        let seen = scope(ctx("s1"), async {
            tokio::task::yield_now().await;
            current()
        })
        .await;
        assert_eq!(seen.unwrap().session_id, "s1");
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let a = tokio::spawn(scope(ctx("a"), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            current().map(|c| c.session_id)
        }));
        let b = tokio::spawn(scope(ctx("b"), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            current().map(|c| c.session_id)
        }));
        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_session_context_view() {
        let view = ctx("s1").session_context();
        assert_eq!(view.work_id, "w1");
        assert_eq!(view.client_id.as_deref(), Some("client-s1"));
    }
}
