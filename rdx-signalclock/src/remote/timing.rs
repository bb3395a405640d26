//! HTTP adapter for the timing service.
//!
//! `GET {url}?Id_Interseccion={id}` with optional basic auth. The body lists
//! one "semaforo" per approach; only the first entry of each `tiempos` list
//! is used.

use super::TimingFetchService;
use crate::common::{ApproachId, IntersectionId};
use crate::error::FetchError;
use crate::table::{RawApproachTiming, RawPhaseTimings};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TimingResponse {
    semaforos: Vec<WireApproach>,
}

#[derive(Debug, Deserialize)]
struct WireApproach {
    #[serde(rename = "id_Semaforo")]
    id: u32,
    #[serde(default)]
    tiempos: Vec<WireTimings>,
}

#[derive(Debug, Deserialize)]
struct WireTimings {
    #[serde(rename = "fld_TiempoVerdeEfectivo")]
    green_effective: f64,
    #[serde(rename = "fld_TiempoVerdeDestello")]
    green_flash: f64,
    #[serde(rename = "fld_TiempoAmbar")]
    amber: f64,
}

/// Decodes a timing response body into raw records, preserving their order.
pub fn parse_timing_response(body: &str) -> Result<Vec<RawApproachTiming>, FetchError> {
    let response: TimingResponse = serde_json::from_str(body)?;
    Ok(response
        .semaforos
        .into_iter()
        .map(|approach| RawApproachTiming {
            approach_id: ApproachId(approach.id),
            timings: approach.tiempos.first().map(|t| RawPhaseTimings {
                green_effective: t.green_effective,
                green_flash: t.green_flash,
                amber: t.amber,
            }),
        })
        .collect())
}

/// Fetches timing tables over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTimingService {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, String)>,
}

impl HttpTimingService {
    pub fn new(
        url: impl Into<String>,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }
}

impl TimingFetchService for HttpTimingService {
    async fn fetch_timings(
        &self,
        intersection: IntersectionId,
    ) -> Result<Vec<RawApproachTiming>, FetchError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("Id_Interseccion", intersection.0)]);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        debug!("Timing service answered for intersection {}: {}", intersection, body);
        parse_timing_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_records_in_order_and_keeps_the_first_timing_entry() {
        let body = r#"{
            "semaforos": [
                {"id_Semaforo": 11, "tiempos": [
                    {"fld_TiempoVerdeEfectivo": 25, "fld_TiempoVerdeDestello": 3, "fld_TiempoAmbar": 3},
                    {"fld_TiempoVerdeEfectivo": 99, "fld_TiempoVerdeDestello": 9, "fld_TiempoAmbar": 9}
                ]},
                {"id_Semaforo": 12, "tiempos": [
                    {"fld_TiempoVerdeEfectivo": 18, "fld_TiempoVerdeDestello": 2, "fld_TiempoAmbar": 4, "extra": true}
                ]},
                {"id_Semaforo": 13, "tiempos": []}
            ]
        }"#;
        let records = parse_timing_response(body).unwrap();
        assert_eq!(
            records,
            vec![
                RawApproachTiming::new(11, 25.0, 3.0, 3.0),
                RawApproachTiming::new(12, 18.0, 2.0, 4.0),
                RawApproachTiming {
                    approach_id: ApproachId(13),
                    timings: None
                },
            ]
        );
    }

    #[test]
    fn undecodable_bodies_are_fetch_errors() {
        for body in ["", "{}", r#"{"semaforos": [{"tiempos": []}]}"#, "<html>"] {
            assert!(
                matches!(parse_timing_response(body), Err(FetchError::Decode(_))),
                "{body:?} should not decode"
            );
        }
    }

    const BODY: &str = r#"{"semaforos": [
        {"id_Semaforo": 1, "tiempos": [
            {"fld_TiempoVerdeEfectivo": 5, "fld_TiempoVerdeDestello": 2, "fld_TiempoAmbar": 3}
        ]}
    ]}"#;

    #[tokio::test]
    async fn fetch_sends_the_intersection_and_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiempos/listar")
            .match_query(mockito::Matcher::UrlEncoded(
                "Id_Interseccion".into(),
                "7".into(),
            ))
            // base64("ops:secret")
            .match_header("authorization", "Basic b3BzOnNlY3JldA==")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BODY)
            .create_async()
            .await;

        let service = HttpTimingService::new(
            format!("{}/tiempos/listar", server.url()),
            Some(("ops".to_string(), "secret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        let records = service.fetch_timings(IntersectionId(7)).await.unwrap();

        assert_eq!(records, vec![RawApproachTiming::new(1, 5.0, 2.0, 3.0)]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiempos/listar")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let service = HttpTimingService::new(
            format!("{}/tiempos/listar", server.url()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            service.fetch_timings(IntersectionId(1)).await,
            Err(FetchError::Status(503))
        ));
        mock.assert_async().await;
    }
}
