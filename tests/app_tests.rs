use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use trading_bot::app::App;
use trading_bot::broker::MockBroker;
use trading_bot::error::AppError;
use trading_bot::ingest::{IngestPipeline, PipelineState, SimulatedSource};
use trading_bot::model::order::OrderSide;
use trading_bot::model::trade::TradeStatus;
use trading_bot::store::SqliteStore;

fn test_app() -> (App, Arc<MockBroker>) {
    let lifetime = CancellationToken::new();
    let broker = Arc::new(MockBroker::new());
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let source = Arc::new(SimulatedSource::new(Duration::from_millis(5), &lifetime));
    let pipeline = IngestPipeline::new(source, store.clone(), 64);
    (App::new(broker.clone(), store, pipeline, lifetime), broker)
}

#[test]
/// Verifies the greeting text used by the health surface.
fn greet_formats_name() {
    let (app, _) = test_app();
    assert_eq!(app.greet("Ada"), "Hello Ada, It's show time!");
}

#[tokio::test]
/// Verifies the mock broker's canned balance and positions are exposed.
async fn balance_and_portfolio_from_mock_broker() {
    let (app, _) = test_app();
    assert!((app.account_balance().await.expect("balance") - 10_000.50).abs() < 1e-9);

    let positions = app.portfolio().await.expect("portfolio");
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0].symbol, "AAPL");
    assert!((positions[0].pnl - 50.0).abs() < 1e-9);
    assert_eq!(positions[1].symbol, "TSLA");
    assert!((positions[1].pnl + 50.0).abs() < 1e-9);
}

#[tokio::test]
/// Verifies the stream status strings and that simulated ticks are persisted
/// while streaming; after shutdown further starts report an error line.
async fn market_stream_status_lines() {
    let (app, _) = test_app();

    assert_eq!(app.start_market_stream("aapl").await, "Started streaming AAPL");
    assert_eq!(app.stream_stats().state, PipelineState::Consuming);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app.store().tick_count().expect("count") == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no simulated ticks persisted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    app.shutdown().await;
    assert_eq!(app.stream_stats().state, PipelineState::Closed);
    assert_eq!(
        app.start_market_stream("AAPL").await,
        "Error starting stream: pipeline is closed"
    );
}

#[tokio::test]
/// Verifies an invalid symbol yields an error status line, not a panic.
async fn market_stream_rejects_bad_symbol() {
    let (app, _) = test_app();
    let status = app.start_market_stream("not a ticker").await;
    assert!(status.starts_with("Error starting stream:"), "{}", status);
    app.shutdown().await;
}

#[test]
/// Verifies register/login: emails are normalised, duplicates conflict and
/// bad passwords are rejected with the same message as unknown emails.
fn register_and_login() {
    let (app, _) = test_app();

    let user = app
        .register(" Trader@Example.com ", "correct-horse")
        .expect("register");
    assert_eq!(user.email, "trader@example.com");

    let dup = app.register("trader@example.com", "another-pass").unwrap_err();
    assert!(matches!(dup, AppError::Conflict(_)));
    assert_eq!(dup.to_string(), "email already exists");

    let logged_in = app
        .login("TRADER@example.com", "correct-horse")
        .expect("login");
    assert_eq!(logged_in.id, user.id);

    let wrong = app.login("trader@example.com", "wrong-pass").unwrap_err();
    let unknown = app.login("ghost@example.com", "correct-horse").unwrap_err();
    assert_eq!(wrong.to_string(), "invalid email or password");
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[test]
/// Verifies registration input validation.
fn register_validates_input() {
    let (app, _) = test_app();
    assert!(matches!(
        app.register("no-at-sign", "long-enough").unwrap_err(),
        AppError::Validation(_)
    ));
    assert!(matches!(
        app.register("a@example.com", "short").unwrap_err(),
        AppError::Validation(_)
    ));
}

#[test]
/// Verifies settings defaults, save and theme validation.
fn settings_round_trip_through_app() {
    let (app, _) = test_app();
    let user = app.register("s@example.com", "password123").expect("register");

    let mut settings = app.settings(user.id).expect("settings");
    assert_eq!(settings.theme, "dark");

    settings.theme = "light".to_string();
    settings.notifications_push = true;
    app.save_settings(&settings).expect("save");
    assert_eq!(app.settings(user.id).expect("settings"), settings);

    settings.theme = "neon".to_string();
    assert!(matches!(
        app.save_settings(&settings).unwrap_err(),
        AppError::Validation(_)
    ));
}

#[test]
/// Verifies stock search is a case-insensitive prefix match capped at five.
fn search_stocks_prefix_match() {
    let (app, _) = test_app();
    assert_eq!(app.search_stocks("a"), vec!["AAPL", "AMZN", "AMD"]);
    assert_eq!(app.search_stocks("ms"), vec!["MSFT"]);
    assert_eq!(app.search_stocks("").len(), 5);
    assert!(app.search_stocks("zzz").is_empty());
}

#[tokio::test]
/// Verifies a manual order reaches the broker and is recorded as an open
/// trade with the broker's order id.
async fn place_order_records_trade() {
    let (app, broker) = test_app();

    let ack = app.place_order("tsla", 3.0, "sell").await.expect("order");
    assert_eq!(ack.status, "accepted");

    let submitted = broker.submitted_orders();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].symbol, "TSLA");
    assert_eq!(submitted[0].side, OrderSide::Sell);

    let trades = app.recent_trades(10).expect("recent trades");
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id, ack.id);
    assert_eq!(trades[0].strategy, "Manual");
    assert_eq!(trades[0].status, TradeStatus::Open);
}

#[tokio::test]
/// Verifies order validation happens before anything reaches the broker.
async fn place_order_validation() {
    let (app, broker) = test_app();
    for (symbol, qty, side) in [("", 1.0, "buy"), ("AAPL", 0.0, "buy"), ("AAPL", 1.0, "hold")] {
        let err = app.place_order(symbol, qty, side).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{:?}", err);
    }
    assert!(broker.submitted_orders().is_empty());
}
