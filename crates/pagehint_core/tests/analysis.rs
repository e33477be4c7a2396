//! End-to-end analysis runs against scripted plugins.

use std::sync::Arc;
use std::time::Duration;

use pagehint_core::test_utils::{
    RecordingFormatter, ScriptedConnector, StaticParser, StaticRule, fetch_end,
    fetch_end_with_body,
};
use pagehint_core::{
    AnalyzeRequest, ConfigError, ConfigOverrides, EngineError, EngineState, PluginPackage,
    PluginRegistry, TargetOutcome, analyze, prepare,
};
use pagehint_plugin::{Category, Event, HandlerMap, PluginError, RuleMeta, Severity, Url};
use pretty_assertions::assert_eq;
use serde_json::json;

fn url(value: &str) -> Url {
    Url::parse(value).unwrap()
}

/// Reports every fetched resource once.
fn report_fetches() -> StaticRule {
    StaticRule::with_handlers(RuleMeta::new(Category::Performance), |context| {
        HandlerMap::new().on("fetch::end", move |event| {
            let context = context.clone();
            async move {
                context.report(event.resource(), None, "Resource fetched");
                Ok(())
            }
        })
    })
}

/// Never settles on `fetch::end`.
fn hang_on_fetch() -> StaticRule {
    StaticRule::with_handlers(RuleMeta::new(Category::Other), |_| {
        HandlerMap::new().on("fetch::end", |_| async {
            futures::future::pending::<()>().await;
            Ok(())
        })
    })
}

fn request(config: serde_json::Value, targets: &[&str]) -> AnalyzeRequest {
    AnalyzeRequest {
        config: Some(config),
        overrides: ConfigOverrides::default(),
        targets: targets.iter().map(|target| url(target)).collect(),
    }
}

#[tokio::test]
async fn test_single_warning_problem() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com", "html")]),
            )
            .with_rule("fetches", report_fetches()),
    );

    let (engine, report) = analyze(
        request(
            json!({ "connector": "scripted", "rules": { "fetches": "warning" } }),
            &["http://example.com"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let results: Vec<_> = report.results().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].problems.len(), 1);

    let problem = &results[0].problems[0];
    assert_eq!(problem.rule_id, "fetches");
    assert_eq!(problem.severity, Severity::Warning);
    assert_eq!(problem.resource, "http://example.com");
    assert!(!report.has_errors());
    assert_eq!(engine.state(), &EngineState::Closed);
}

#[tokio::test]
async fn test_ignored_urls_drop_reports() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![
                    fetch_end("https://static.somecdn.com/lib.js", "script"),
                    fetch_end("https://example.com/app.js", "script"),
                ]),
            )
            .with_rule("fetches", report_fetches()),
    );

    let (_, report) = analyze(
        request(
            json!({
                "connector": "scripted",
                "rules": { "fetches": "error" },
                "ignoredUrls": [{ "domain": ".*\\.SomeCDN\\.com", "rules": ["fetches"] }]
            }),
            &["https://example.com"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let result = report.results().next().unwrap();
    assert_eq!(result.problems.len(), 1);
    assert_eq!(result.problems[0].resource, "https://example.com/app.js");
}

#[tokio::test]
async fn test_never_settling_rule_times_out() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![
                    fetch_end("http://example.com/first.js", "script"),
                    Event::scan("traverse::start", "http://example.com"),
                ]),
            )
            .with_rule("hangs", hang_on_fetch())
            .with_rule(
                "after",
                StaticRule::with_handlers(RuleMeta::new(Category::Other), |context| {
                    HandlerMap::new().on("traverse::start", move |event| {
                        let context = context.clone();
                        async move {
                            context.report(event.resource(), None, "Traversal reached");
                            Ok(())
                        }
                    })
                }),
            ),
    );

    let (_, report) = analyze(
        request(
            json!({
                "connector": "scripted",
                "rules": { "hangs": "warning", "after": "warning" },
                "rulesTimeout": 50
            }),
            &["http://example.com"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let result = report.results().next().unwrap();
    let timeouts: Vec<_> = result
        .problems
        .iter()
        .filter(|problem| problem.rule_id == "hangs")
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].severity, Severity::Error);
    assert_eq!(timeouts[0].resource, "http://example.com/first.js");

    assert!(result.problems.iter().any(|problem| problem.rule_id == "after"));
    assert!(report.has_errors());
}

#[tokio::test]
async fn test_failing_target_does_not_stop_the_run() {
    let connector = ScriptedConnector::factory(vec![fetch_end("http://second.test/", "html")])
        .failing_on("http://first.test/");
    let closed = connector.close_count();
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector("scripted", connector)
            .with_rule("fetches", report_fetches()),
    );

    let (_, report) = analyze(
        request(
            json!({ "connector": "scripted", "rules": { "fetches": "warning" } }),
            &["http://first.test/", "http://second.test/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    match &report.outcomes[0] {
        TargetOutcome::Failed { target, error } => {
            assert_eq!(target.as_str(), "http://first.test/");
            assert!(matches!(error, EngineError::ConnectorError { .. }));
        }
        other => panic!("Expected a failed target, got {:?}", other),
    }
    match &report.outcomes[1] {
        TargetOutcome::Completed(result) => {
            assert_eq!(result.problems.len(), 1);
            assert_eq!(result.problems[0].resource, "http://second.test/");
        }
        other => panic!("Expected a completed target, got {:?}", other),
    }
    assert!(report.has_errors());
    assert_eq!(*closed.lock(), 1);
}

#[tokio::test]
async fn test_missing_rule_prevents_construction() {
    let registry = PluginRegistry::new(PluginPackage::new("test").with_connector(
        "scripted",
        ScriptedConnector::factory(Vec::new()),
    ));

    let result = prepare(
        Some(json!({ "connector": "scripted", "rules": { "nowhere": "error" } })),
        &ConfigOverrides::default(),
        &registry,
    );

    match result {
        Err(EngineError::MissingPlugins {
            missing,
            incompatible,
        }) => {
            assert_eq!(missing, vec!["rule-nowhere".to_string()]);
            assert!(incompatible.is_empty());
        }
        other => panic!("Expected MissingPlugins, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_missing_config_is_fatal() {
    let registry = PluginRegistry::new(PluginPackage::new("test"));

    let result = analyze(AnalyzeRequest::default(), &registry).await;

    assert!(matches!(
        result,
        Err(EngineError::Config(ConfigError::NotFound))
    ));
}

#[tokio::test]
async fn test_extends_from_registry() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com/", "html")]),
            )
            .with_rule("fetches", report_fetches())
            .with_configuration(
                "shared",
                json!({ "connector": "scripted", "rules": { "fetches": "error" } }),
            ),
    );

    let (engine, report) = analyze(
        request(
            json!({ "extends": ["shared"], "rules": { "fetches": "warning" } }),
            &["http://example.com/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    assert_eq!(engine.config().extends, vec!["shared".to_string()]);
    let result = report.results().next().unwrap();
    assert_eq!(result.problems[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_parser_events_reach_rules() {
    let parser = StaticParser::with_handlers(vec!["parse::manifest"], |context| {
        HandlerMap::new().on("fetch::end::json", move |event| {
            let context = context.clone();
            async move {
                let body = event
                    .fetch_end()
                    .map(|fetch| fetch.response.body.content.clone())
                    .unwrap_or_default();
                let data: serde_json::Value = serde_json::from_str(&body)?;
                context
                    .emit(Event::data("parse::manifest", event.resource(), data))
                    .await;
                Ok::<(), PluginError>(())
            }
        })
    });
    let rule = StaticRule::with_handlers(RuleMeta::new(Category::Pwa), |context| {
        HandlerMap::new().on("parse::manifest", move |event| {
            let context = context.clone();
            async move {
                let name = event
                    .data_payload()
                    .and_then(|data| data.get("name"))
                    .and_then(|name| name.as_str())
                    .unwrap_or_default()
                    .to_string();
                context.report(event.resource(), None, format!("Manifest for {}", name));
                Ok(())
            }
        })
    });
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end_with_body(
                    "http://example.com/manifest.json",
                    "json",
                    r#"{ "name": "Demo" }"#,
                )]),
            )
            .with_parser("manifest", parser)
            .with_rule("manifest-name", rule),
    );

    let (_, report) = analyze(
        request(
            json!({
                "connector": "scripted",
                "parsers": ["manifest"],
                "rules": { "manifest-name": "warning" }
            }),
            &["http://example.com/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let result = report.results().next().unwrap();
    assert_eq!(result.problems.len(), 1);
    assert_eq!(result.problems[0].message, "Manifest for Demo");
    assert_eq!(result.problems[0].resource, "http://example.com/manifest.json");
}

#[tokio::test]
async fn test_formatters_receive_each_target() {
    let formatter = RecordingFormatter::default();
    let printed = formatter.printed.clone();
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com/a.css", "css")]),
            )
            .with_rule("fetches", report_fetches())
            .with_formatter("recording", formatter),
    );

    analyze(
        request(
            json!({
                "connector": "scripted",
                "rules": { "fetches": "error" },
                "formatters": "recording"
            }),
            &["http://one.test/", "http://two.test/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let printed = printed.lock();
    assert_eq!(printed.len(), 2);
    assert!(printed.iter().all(|problems| problems.len() == 1));
}

#[tokio::test]
async fn test_progress_listener_sees_every_event() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test").with_connector(
            "scripted",
            ScriptedConnector::factory(vec![
                Event::scan("fetch::start", "http://example.com/"),
                fetch_end("http://example.com/", "html"),
            ]),
        ),
    );
    let mut engine = prepare(
        Some(json!({ "connector": "scripted" })),
        &ConfigOverrides::default(),
        &registry,
    )
    .unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.prepend_any(Arc::new(move |event: &Event| {
        sink.lock().push(event.name().to_string())
    }));

    let report = pagehint_core::run(&mut engine, &[url("http://example.com/")])
        .await
        .unwrap();
    engine.close().await.unwrap();

    assert!(report.results().next().unwrap().problems.is_empty());
    assert_eq!(
        *seen.lock(),
        vec!["scan::start", "fetch::start", "fetch::end::html", "scan::end"]
    );
}

#[tokio::test]
async fn test_rules_timeout_override() {
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com/", "html")]),
            )
            .with_rule("hangs", hang_on_fetch()),
    );
    let mut request = request(
        json!({ "connector": "scripted", "rules": { "hangs": "error" } }),
        &["http://example.com/"],
    );
    request.overrides.rules_timeout = Some(Duration::from_millis(20));

    let (engine, report) = analyze(request, &registry).await.unwrap();

    assert_eq!(engine.config().rules_timeout, Duration::from_millis(20));
    assert_eq!(report.results().next().unwrap().problems.len(), 1);
}

#[tokio::test]
async fn test_late_report_stays_out_of_next_target() {
    let late = StaticRule::with_handlers(RuleMeta::new(Category::Other), |context| {
        HandlerMap::new().on("scan::start", move |event| {
            let context = context.clone();
            async move {
                if event.resource().contains("first") {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    context.report(event.resource(), None, "Late from first");
                }
                Ok(())
            }
        })
    });
    // Keeps the second target busy until the late report arrives.
    let pause = StaticParser::with_handlers(vec![], |_| {
        HandlerMap::new().on("scan::end", |event| async move {
            if event.resource().contains("second") {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            Ok(())
        })
    });
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector("scripted", ScriptedConnector::factory(vec![]))
            .with_parser("pause", pause)
            .with_rule("late", late),
    );

    let (_, report) = analyze(
        request(
            json!({
                "connector": "scripted",
                "parsers": ["pause"],
                "rules": { "late": "warning" },
                "rulesTimeout": 20
            }),
            &["http://first.test/", "http://second.test/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    let results: Vec<_> = report.results().collect();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].problems.len(), 1);
    assert_eq!(results[0].problems[0].severity, Severity::Error);
    assert_eq!(results[0].problems[0].resource, "http://first.test/");

    assert!(
        results[1]
            .problems
            .iter()
            .all(|problem| problem.resource != "http://first.test/"),
        "{:?}",
        results[1].problems
    );
    assert!(!results[1].has_errors());
}

#[tokio::test]
async fn test_panicking_parser_handler_does_not_abort_target() {
    let parser = StaticParser::with_handlers(vec!["parse::script"], |_| {
        HandlerMap::new().on("fetch::end", |event| async move {
            let segments: Vec<&str> = event.name().split("::").collect();
            let _ = segments[3];
            Ok(())
        })
    });
    let failing = StaticParser::with_handlers(vec![], |_| {
        HandlerMap::new().on("fetch::end", |_| async {
            Err(PluginError::handler("unreadable body"))
        })
    });
    let registry = PluginRegistry::new(
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com/app.js", "script")]),
            )
            .with_parser("explodes", parser)
            .with_parser("fails", failing)
            .with_rule("fetches", report_fetches()),
    );

    let (_, report) = analyze(
        request(
            json!({
                "connector": "scripted",
                "parsers": ["explodes", "fails"],
                "rules": { "fetches": "warning" }
            }),
            &["http://one.test/", "http://two.test/"],
        ),
        &registry,
    )
    .await
    .unwrap();

    assert_eq!(report.failures().count(), 0);
    let results: Vec<_> = report.results().collect();
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.problems[0].resource, "http://example.com/app.js");
    }
}
