// Upstream adapters against a local HTTP mock: payload parsing and error mapping.

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fintrack_api::providers::{
    AlphaVantageProvider, CoinGeckoProvider, ExchangeRatesProvider, PriceProvider, ProviderError, RateLimit,
    RateProvider,
};

fn alpha_vantage(server: &MockServer) -> AlphaVantageProvider {
    AlphaVantageProvider::new("test-key", false)
        .with_base_url(&format!("{}/query", server.uri()))
        .with_rate_limit(RateLimit::default())
}

#[tokio::test]
async fn test_alpha_vantage_global_quote() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "GLOBAL_QUOTE"))
        .and(query_param("symbol", "IBM"))
        .and(query_param("apikey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Global Quote": {
                "01. symbol": "IBM",
                "03. high": "184.0000",
                "04. low": "180.1000",
                "05. price": "182.5500",
                "06. volume": "3100000",
                "09. change": "0.8200",
                "10. change percent": "0.4512%"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let price = alpha_vantage(&server).get_price("ibm").await.unwrap();
    assert_eq!(price.symbol, "IBM");
    assert_eq!(price.asset_class, "stocks");
    assert_eq!(price.price, 182.55);
    assert_eq!(price.change_percent_24h, Some(0.4512));
    assert_eq!(price.high_24h, Some(184.0));
    assert_eq!(price.volume_24h, Some(3_100_000.0));
}

#[tokio::test]
async fn test_alpha_vantage_unknown_symbol_and_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("symbol", "NOPE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Global Quote": {}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("symbol", "MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
        })))
        .mount(&server)
        .await;

    let provider = alpha_vantage(&server);
    let err = provider.get_price("NOPE").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)), "got {:?}", err);
    let err = provider.get_price("MSFT").await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_alpha_vantage_history_is_filtered_and_sorted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "TIME_SERIES_DAILY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Time Series (Daily)": {
                "2024-03-04": {"1. open": "10", "2. high": "12", "3. low": "9", "4. close": "11", "5. volume": "100"},
                "2024-03-01": {"1. open": "8", "2. high": "9", "3. low": "7", "4. close": "8.5", "5. volume": "90"},
                "2024-02-01": {"1. open": "5", "2. high": "6", "3. low": "4", "4. close": "5.5", "5. volume": "80"}
            }
        })))
        .mount(&server)
        .await;

    let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
    let points = alpha_vantage(&server).get_history("IBM", from, to).await.unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].date, from);
    assert_eq!(points[0].close, 8.5);
    assert_eq!(points[1].high, Some(12.0));
}

#[tokio::test]
async fn test_coingecko_batch_uses_known_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .and(query_param("vs_currency", "usd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "bitcoin", "symbol": "btc", "current_price": 65000.0, "market_cap": 1.2e12,
             "price_change_percentage_24h": -1.5},
            {"id": "ethereum", "symbol": "eth", "current_price": 3200.0}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = CoinGeckoProvider::new(&server.uri());
    let prices = provider
        .get_batch(&["btc".to_string(), "ETH".to_string()])
        .await
        .unwrap();

    assert_eq!(prices.len(), 2);
    assert_eq!(prices["BTC"].price, 65000.0);
    assert_eq!(prices["BTC"].change_percent_24h, Some(-1.5));
    assert_eq!(prices["ETH"].asset_class, "crypto");
}

#[tokio::test]
async fn test_coingecko_resolves_unknown_ticker_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("query", "PEPE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "coins": [
                {"id": "pepe-knockoff", "name": "Pepe Knockoff", "symbol": "PEPE", "market_cap_rank": null},
                {"id": "pepe", "name": "Pepe", "symbol": "PEPE", "market_cap_rank": 30},
                {"id": "pepecoin", "name": "PepeCoin", "symbol": "PEPECOIN", "market_cap_rank": 900}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .and(query_param("ids", "pepe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "pepe", "symbol": "pepe", "current_price": 0.0000089}
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let provider = CoinGeckoProvider::new(&server.uri());
    assert_eq!(provider.get_price("pepe").await.unwrap().price, 0.0000089);
    assert_eq!(provider.get_price("PEPE").await.unwrap().symbol, "PEPE");
}

#[tokio::test]
async fn test_coingecko_too_many_requests_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = CoinGeckoProvider::new(&server.uri()).get_price("BTC").await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { provider: "coingecko" }));
}

#[tokio::test]
async fn test_eur_only_rates_are_reanchored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("access_key", "fx-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "timestamp": 1_700_000_000,
            "base": "EUR",
            "rates": {"USD": 1.1, "GBP": 0.88, "JPY": 160.0}
        })))
        .mount(&server)
        .await;

    let provider = ExchangeRatesProvider::new("fx-key", true).with_base_url(&server.uri());
    let table = provider.latest("usd").await.unwrap();

    assert_eq!(table.base, "USD");
    assert_eq!(table.rate("USD"), Some(1.0));
    assert!((table.rate("EUR").unwrap() - 1.0 / 1.1).abs() < 1e-12);
    assert!((table.rate("GBP").unwrap() - 0.88 / 1.1).abs() < 1e-12);
    assert_eq!(table.updated_at.timestamp(), 1_700_000_000);
}

#[tokio::test]
async fn test_exchange_rates_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": {"code": 201, "type": "invalid_base_currency", "info": "An invalid base currency has been entered."}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2024-01-15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": {"code": 104, "type": "usage_limit_reached"}
        })))
        .mount(&server)
        .await;

    let provider = ExchangeRatesProvider::new("fx-key", false).with_base_url(&server.uri());
    let err = provider.latest("XYZ").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)), "got {:?}", err);

    let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let err = provider.historical("USD", day).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}

#[tokio::test]
async fn test_fiat_pair_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "base": "EUR",
            "rates": {"USD": 1.1, "GBP": 0.85}
        })))
        .mount(&server)
        .await;

    let provider = ExchangeRatesProvider::new("fx-key", true).with_base_url(&server.uri());
    let price = provider.get_price("EUR/GBP").await.unwrap();
    assert_eq!(price.asset_class, "fiat");
    assert_eq!(price.currency, "GBP");
    assert_eq!(price.price, 0.85);

    let err = provider.get_price("EURO").await.unwrap_err();
    assert!(matches!(err, ProviderError::Unsupported(_)));
}
