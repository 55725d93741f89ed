//! Integration tests for WeatherFetcher and GeocodingResolver using wiremock.

use std::time::Duration;

use wayfarer_weather::provider::{SIMULATED_HUMIDITY, SIMULATED_TEMPERATURE, SIMULATED_WIND};
use wayfarer_weather::{
    Condition, Coordinate, GeocodingResolver, SampleSource, WeatherFetcher, WeatherSample,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BENGALURU: Coordinate = Coordinate::new(12.97, 77.59);

fn fetcher(server: &MockServer) -> WeatherFetcher {
    WeatherFetcher::with_base_url(&server.uri(), "test-key", Duration::from_secs(2)).unwrap()
}

fn resolver(server: &MockServer) -> GeocodingResolver {
    GeocodingResolver::with_base_url(&server.uri(), "wayfarer-tests", Duration::from_secs(2))
        .unwrap()
}

fn assert_simulated(sample: &WeatherSample) {
    assert_eq!(sample.source, SampleSource::Simulated);
    assert!(SIMULATED_TEMPERATURE.contains(&sample.temperature));
    assert!(SIMULATED_HUMIDITY.contains(&sample.humidity));
    assert!(SIMULATED_WIND.contains(&sample.wind_speed));
}

#[tokio::test]
async fn test_fetch_maps_remote_fields() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("appid", "test-key"))
        .and(query_param("units", "metric"))
        .and(query_param("lat", "12.97"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "weather": [{ "main": "Clouds", "description": "broken clouds" }],
            "main": { "temp": 26.4, "humidity": 71 },
            "wind": { "speed": 4.6 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sample = fetcher(&server).fetch(BENGALURU).await;

    assert_eq!(sample.source, SampleSource::Remote);
    assert_eq!(sample.temperature, 26.4);
    assert_eq!(sample.humidity, 71);
    assert_eq!(sample.wind_speed, 4.6);
    assert_eq!(sample.summary, "Clouds");
    assert_eq!(sample.condition, Condition::Warm);
}

#[tokio::test]
async fn test_fetch_server_error_falls_back_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let sample = fetcher(&server).fetch(BENGALURU).await;
    assert_simulated(&sample);
}

#[tokio::test]
async fn test_fetch_unauthorized_falls_back() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "cod": 401, "message": "Invalid API key"
        })))
        .mount(&server)
        .await;

    assert_simulated(&fetcher(&server).fetch(BENGALURU).await);
}

#[tokio::test]
async fn test_fetch_malformed_body_falls_back() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    assert_simulated(&fetcher(&server).fetch(BENGALURU).await);
}

#[tokio::test]
async fn test_fetch_timeout_falls_back() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let fetcher =
        WeatherFetcher::with_base_url(&server.uri(), "test-key", Duration::from_millis(200))
            .unwrap();
    assert_simulated(&fetcher.fetch(BENGALURU).await);
}

#[tokio::test]
async fn test_fetch_unreachable_host_falls_back() {
    // Nothing listens on port 1
    let fetcher =
        WeatherFetcher::with_base_url("http://127.0.0.1:1", "test-key", Duration::from_secs(1))
            .unwrap();

    for lat in [-89.0, 0.0, 45.5, 89.9] {
        assert_simulated(&fetcher.fetch(Coordinate::new(lat, 10.0)).await);
    }
}

#[tokio::test]
async fn test_resolve_uses_first_match() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Kathmandu"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "lat": "27.7172", "lon": "85.3240", "display_name": "Kathmandu, Nepal" },
            { "lat": "0", "lon": "0", "display_name": "Elsewhere" }
        ])))
        .mount(&server)
        .await;

    let place = resolver(&server).resolve("Kathmandu").await.unwrap();
    assert_eq!(place.display_name, "Kathmandu, Nepal");
    assert_eq!(place.coordinate, Coordinate::new(27.7172, 85.3240));
}

#[tokio::test]
async fn test_resolve_empty_result_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    assert_eq!(resolver(&server).resolve("Zzqxnonexistentplace").await, None);
}

#[tokio::test]
async fn test_resolve_server_error_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert_eq!(resolver(&server).resolve("Paris").await, None);
}

#[tokio::test]
async fn test_resolve_bad_coordinates_are_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "lat": "north", "lon": "85.3", "display_name": "Broken" }
        ])))
        .mount(&server)
        .await;

    assert_eq!(resolver(&server).resolve("Broken").await, None);
}

#[tokio::test]
async fn test_resolve_does_not_cache() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "lat": "48.8566", "lon": "2.3522", "display_name": "Paris, France" }
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = resolver(&server);
    assert!(resolver.resolve("Paris").await.is_some());
    assert!(resolver.resolve("Paris").await.is_some());
}

#[tokio::test]
async fn test_reverse_builds_short_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "Bengaluru, Bangalore North, Karnataka, India",
            "address": { "city": "Bengaluru", "state": "Karnataka", "country": "India" }
        })))
        .mount(&server)
        .await;

    let name = resolver(&server).reverse(BENGALURU).await;
    assert_eq!(name.as_deref(), Some("Bengaluru, Karnataka"));
}
