mod common;

use std::sync::Arc;

use common::{emitter, test_config, FakePortal, FakeRecord, LANDING_URL};
use lmscrawl_core::{AuthError, AuthenticatedContext, LoginWorkflow};

fn portal_and_workflow() -> (FakePortal, LoginWorkflow) {
    let config = test_config();
    let portal = FakePortal::new(&config, vec![FakeRecord::new("Kim", "link")]);
    let workflow = LoginWorkflow::new(Arc::new(config), portal.launcher());
    (portal, workflow)
}

#[tokio::test]
async fn test_login_fills_form_and_reopens_tab() {
    let (portal, workflow) = portal_and_workflow();
    let (emitter, log, _hub) = emitter();

    let _context = workflow
        .authenticate(None, &emitter)
        .await
        .expect("login should succeed");

    let state = portal.state();
    assert_eq!(state.launches, 1);
    assert_eq!(state.selected, vec![0]);
    let typed: Vec<&str> = state.typed.iter().map(|(_, text)| text.as_str()).collect();
    assert_eq!(typed, vec!["admin@lms.test", "secret"]);
    assert_eq!(state.windows, vec!["tab-1".to_string()]);
    assert_eq!(state.current_window.as_deref(), Some("tab-1"));
    assert_eq!(state.navigations.last().map(String::as_str), Some(LANDING_URL));
    assert_eq!(state.teardowns, 0);
    drop(state);

    let messages: Vec<String> = log.recent(50).into_iter().map(|entry| entry.message).collect();
    for expected in [
        "Site selected.",
        "Username entered.",
        "Password entered.",
        "Login button clicked.",
        "Login succeeded!",
    ] {
        assert!(
            messages.iter().any(|message| message == expected),
            "missing log line {expected:?}"
        );
    }
    assert!(messages
        .iter()
        .any(|message| message.starts_with("Reopened https://lms.test/dashboard")));
}

#[tokio::test]
async fn test_missing_element_fails_and_tears_down() {
    let (portal, workflow) = portal_and_workflow();
    let selector = test_config().selectors.site_select;
    portal.state().missing.insert(selector);
    let (emitter, log, _hub) = emitter();

    let err = workflow.authenticate(None, &emitter).await.unwrap_err();
    assert!(matches!(err, AuthError::Step { step: "locate site selector", .. }));
    assert_eq!(portal.state().teardowns, 1);
    assert!(log
        .recent(50)
        .iter()
        .any(|entry| entry.message.starts_with("Login failed:")));
}

#[tokio::test]
async fn test_unchanged_url_is_not_a_login() {
    let (portal, workflow) = portal_and_workflow();
    portal.state().redirect_after_login = false;
    let (emitter, _log, _hub) = emitter();

    let err = workflow.authenticate(None, &emitter).await.unwrap_err();
    assert!(matches!(err, AuthError::LoginNotConfirmed { .. }));
    assert_eq!(portal.state().teardowns, 1);
}

#[tokio::test]
async fn test_launch_failure_is_setup_fault() {
    let (portal, workflow) = portal_and_workflow();
    portal.state().fail_launch = true;
    let (emitter, _log, _hub) = emitter();

    let err = workflow.authenticate(None, &emitter).await.unwrap_err();
    assert!(matches!(err, AuthError::Launch(_)));
    assert_eq!(portal.state().teardowns, 0);
}

#[tokio::test]
async fn test_previous_browser_released_first() {
    let (portal, workflow) = portal_and_workflow();
    let (emitter, _log, _hub) = emitter();
    let previous = AuthenticatedContext::new(Box::new(portal.automation()));

    let _context = workflow
        .authenticate(Some(previous), &emitter)
        .await
        .expect("login should succeed");
    let state = portal.state();
    assert_eq!(state.navigations.last().map(String::as_str), Some(LANDING_URL));
    assert_eq!(state.teardowns, 1);
    assert_eq!(state.launches, 1);
    assert!(!state.closed);
}
