//! OTLP export verification tests.
//!
//! These exercise the OpenTelemetry pipeline end to end rather than only
//! checking that spans exist in-memory.
//!
//! Test strategy:
//! 1. Unit tests use `TokioSpanExporter` from opentelemetry_sdk::testing to
//!    capture spans that would be exported, without requiring network.
//! 2. Integration tests marked `#[ignore]` require a running OTLP collector.
//!
//! Run with:
//! ```bash
//! cargo test -p flowline-observability --test otlp_export -- --nocapture
//! ```

// `cargo verify` runs clippy with `-D warnings` for all targets, including tests.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr
)]

use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::testing::trace::new_tokio_test_exporter;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::time::Duration;

// =============================================================================
// Test: OpenTelemetry exporter receives spans through pipeline
// =============================================================================

/// Verifies spans flow through the OpenTelemetry SDK pipeline to an exporter.
/// This tests the core mechanism that OTLP export relies on.
#[tokio::test]
async fn test_spans_flow_through_otel_pipeline() {
    // Create test exporter that captures spans
    let (exporter, mut span_rx, _shutdown_rx) = new_tokio_test_exporter();

    // Build tracer provider with test exporter
    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", "test-service")])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build();

    // Get a tracer from the provider
    let tracer = provider.tracer("otlp-test-tracer");

    // Create and end a span - this should flow through to the exporter
    let mut span = tracer
        .span_builder("test-operation")
        .with_kind(SpanKind::Internal)
        .start(&tracer);

    span.set_attribute(KeyValue::new("test.key", "test.value"));
    span.set_attribute(KeyValue::new("flowline.test", true));
    span.end();

    // Drop provider to trigger flush (OpenTelemetry 0.31+ flushes on drop)
    drop(provider);

    // Verify span was exported
    let exported_span = tokio::time::timeout(Duration::from_secs(5), span_rx.recv())
        .await
        .expect("Timeout waiting for span export")
        .expect("No span received - pipeline didn't export");

    // Verify span data
    assert_eq!(
        exported_span.name.as_ref(),
        "test-operation",
        "Exported span name should match"
    );

    // Verify attributes were exported
    let attrs: Vec<_> = exported_span.attributes.iter().collect();
    assert!(
        attrs.iter().any(|kv| kv.key.as_str() == "test.key"),
        "Span should have test.key attribute. Got: {:?}",
        attrs
    );
    assert!(
        attrs.iter().any(|kv| kv.key.as_str() == "flowline.test"),
        "Span should have flowline.test attribute. Got: {:?}",
        attrs
    );

    println!(
        "PASS: Span '{}' with {} attributes exported through OTel pipeline",
        exported_span.name,
        attrs.len()
    );
}

// =============================================================================
// Test: Multiple spans are batched and exported
// =============================================================================

/// Verifies multiple spans are exported, simulating real-world usage
/// where many operations generate spans.
#[tokio::test]
async fn test_multiple_spans_exported() {
    let (exporter, mut span_rx, _shutdown_rx) = new_tokio_test_exporter();

    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", "multi-span-test")])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build();

    let tracer = provider.tracer("multi-span-tracer");

    // Create multiple spans
    let span_names = vec!["operation-1", "operation-2", "operation-3"];
    for name in &span_names {
        let mut span = tracer.span_builder(*name).start(&tracer);
        span.set_attribute(KeyValue::new("order", *name));
        span.end();
    }

    // Flush by dropping provider
    drop(provider);

    // Collect all exported spans
    let mut exported_names: Vec<String> = Vec::new();
    while let Ok(Some(span)) = tokio::time::timeout(Duration::from_millis(500), span_rx.recv()).await
    {
        exported_names.push(span.name.to_string());
    }

    assert_eq!(
        exported_names.len(),
        3,
        "Should export exactly 3 spans. Got: {:?}",
        exported_names
    );

    // Verify all expected spans were exported
    for expected in &span_names {
        assert!(
            exported_names.iter().any(|n| n == *expected),
            "Missing span '{}'. Exported: {:?}",
            expected,
            exported_names
        );
    }

    println!(
        "PASS: {} spans exported: {:?}",
        exported_names.len(),
        exported_names
    );
}

// =============================================================================
// Test: Parent-child span relationships are preserved
// =============================================================================

/// Verifies that span hierarchies (parent-child relationships) are properly
/// exported. This is critical for distributed tracing to show call trees.
#[tokio::test]
async fn test_span_hierarchy_exported() {
    let (exporter, mut span_rx, _shutdown_rx) = new_tokio_test_exporter();

    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", "hierarchy-test")])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build();

    let tracer = provider.tracer("hierarchy-tracer");

    // Create parent span
    let parent = tracer.span_builder("parent-operation").start(&tracer);
    let parent_context = opentelemetry::Context::current_with_span(parent);

    // Create child span within parent context
    let mut child = tracer
        .span_builder("child-operation")
        .start_with_context(&tracer, &parent_context);
    child.end();

    // End parent span
    parent_context.span().end();

    // Flush
    drop(provider);

    // Collect exported spans
    let mut spans = Vec::new();
    while let Ok(Some(span)) = tokio::time::timeout(Duration::from_millis(500), span_rx.recv()).await
    {
        spans.push(span);
    }

    assert_eq!(spans.len(), 2, "Should export parent and child spans");

    // Find parent and child
    let parent_span = spans
        .iter()
        .find(|s| s.name.as_ref() == "parent-operation")
        .expect("Parent span not found");
    let child_span = spans
        .iter()
        .find(|s| s.name.as_ref() == "child-operation")
        .expect("Child span not found");

    // Verify parent-child relationship
    assert_eq!(
        child_span.parent_span_id, parent_span.span_context.span_id(),
        "Child's parent_span_id should match parent's span_id"
    );
    assert_eq!(
        child_span.span_context.trace_id(),
        parent_span.span_context.trace_id(),
        "Child should have same trace_id as parent"
    );

    println!(
        "PASS: Span hierarchy preserved - parent {} -> child {}",
        parent_span.span_context.span_id(),
        child_span.span_context.span_id()
    );
}

// =============================================================================
// Test: SpanKind is correctly exported
// =============================================================================

/// Verifies that SpanKind (Server, Client, Internal, etc.) is correctly
/// exported. This is important for OTLP backends to categorize operations.
#[tokio::test]
async fn test_span_kind_exported() {
    let (exporter, mut span_rx, _shutdown_rx) = new_tokio_test_exporter();

    let resource = Resource::builder_empty()
        .with_attributes(vec![KeyValue::new("service.name", "kind-test")])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_simple_exporter(exporter)
        .build();

    let tracer = provider.tracer("kind-tracer");

    // Create spans with different kinds
    let kinds = vec![
        ("server-op", SpanKind::Server),
        ("client-op", SpanKind::Client),
        ("internal-op", SpanKind::Internal),
        ("producer-op", SpanKind::Producer),
        ("consumer-op", SpanKind::Consumer),
    ];

    for (name, kind) in &kinds {
        let mut span = tracer.span_builder(*name).with_kind(kind.clone()).start(&tracer);
        span.end();
    }

    drop(provider);

    // Verify each span has correct kind
    let mut kind_count = 0;
    while let Ok(Some(span)) = tokio::time::timeout(Duration::from_millis(500), span_rx.recv()).await
    {
        let expected_kind = kinds
            .iter()
            .find(|(n, _)| *n == span.name.as_ref())
            .map(|(_, k)| k.clone())
            .expect("Unknown span name");

        assert_eq!(
            span.span_kind, expected_kind,
            "Span '{}' should have kind {:?}",
            span.name, expected_kind
        );
        kind_count += 1;
    }

    assert_eq!(kind_count, 5, "Should export 5 spans with different kinds");
    println!("PASS: All 5 SpanKinds correctly exported");
}

// =============================================================================
// Test: OTLP exporter initialization with endpoint
// =============================================================================

/// Verifies that TracingConfig with OTLP endpoint creates a valid exporter.
/// This doesn't send spans over network but verifies config is accepted.
#[tokio::test]
async fn test_otlp_config_accepted() {
    use flowline_observability::{SamplingStrategy, TracingConfig};

    // Create config with OTLP endpoint (won't connect, just validates config)
    let config = TracingConfig::new()
        .with_service_name("otlp-config-test")
        .with_otlp_endpoint("http://localhost:4317")
        .with_sampling_strategy(SamplingStrategy::Always);

    // Verify config fields are set correctly
    assert_eq!(config.service_name, "otlp-config-test");
    assert!(config.otlp_endpoint.is_some());
    assert_eq!(
        config.otlp_endpoint.as_deref(),
        Some("http://localhost:4317")
    );
    assert!(matches!(config.sampling, SamplingStrategy::Always));

    println!("PASS: TracingConfig with OTLP endpoint is valid");
}

// =============================================================================
// Integration Test: Real OTLP collector (requires running collector)
// =============================================================================

/// Integration test that sends spans to a real OTLP collector.
/// Requires: docker run -d -p 4317:4317 jaegertracing/all-in-one:latest
#[tokio::test]
#[ignore = "Requires running OTLP collector - run with --ignored"]
async fn test_otlp_export_to_real_collector() {
    use flowline_observability::{init_tracing, SamplingStrategy, TracingConfig};

    // Check if collector is reachable
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .expect("client");

    // Try Jaeger health endpoint
    let collector_up = client
        .get("http://localhost:14269/")
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);

    if !collector_up {
        println!("============ OTLP INTEGRATION TEST ============");
        println!("Skipping: No OTLP collector running on localhost:4317");
        println!("To run this test:");
        println!("  docker run -d -p 4317:4317 -p 16686:16686 jaegertracing/all-in-one:latest");
        println!("  cargo test -p flowline-observability --test otlp_export -- --ignored --nocapture");
        println!("===============================================");
        return;
    }

    let config = TracingConfig::new()
        .with_service_name("otlp-integration-test")
        .with_otlp_endpoint("http://localhost:4317")
        .with_sampling_strategy(SamplingStrategy::Always);

    // Initialize - may fail if already initialized
    let _ = init_tracing(config).await;

    // Create test spans using global tracer
    let tracer = global::tracer("otlp-integration");
    let mut span = tracer.span_builder("integration-test-span").start(&tracer);
    span.set_attribute(KeyValue::new("test", "otlp-integration"));
    span.set_attribute(KeyValue::new("timestamp", chrono::Utc::now().to_rfc3339()));
    span.end();

    // Give time for export
    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("============ OTLP INTEGRATION TEST ============");
    println!("Span sent to collector at localhost:4317");
    println!("View at: http://localhost:16686");
    println!("Search for service: otlp-integration-test");
    println!("===============================================");
}
