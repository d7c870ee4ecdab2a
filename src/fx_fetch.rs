// 🌐 FX fetch - Banxico SIE client behind the FxSource trait
//
// Response shape:
//   {"bmx": {"series": [{"idSerie": "SF43718",
//                        "datos": [{"fecha": "31/07/2024", "dato": "18.5683"}, ...]}]}}
//
// Daily observations are reduced to the last valid observation of each month.

use crate::config::FxConfig;
use crate::error::{PipelineError, Result};
use crate::period::PeriodKey;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Anything that can produce an end-of-month rate series
pub trait FxSource {
    fn name(&self) -> &str;

    /// End-of-month rates for every month in `first..=last` the source knows
    fn fetch_monthly(&self, first: PeriodKey, last: PeriodKey) -> Result<BTreeMap<PeriodKey, f64>>;
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

#[derive(Debug, Deserialize)]
struct BmxResponse {
    bmx: BmxBody,
}

#[derive(Debug, Deserialize)]
struct BmxBody {
    series: Vec<BmxSeries>,
}

#[derive(Debug, Deserialize)]
struct BmxSeries {
    #[serde(default)]
    datos: Vec<BmxObservation>,
}

#[derive(Debug, Deserialize)]
struct BmxObservation {
    fecha: String,
    dato: String,
}

/// Daily series reduced to month ends
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlySeries {
    pub rates: BTreeMap<PeriodKey, f64>,
    pub observations: usize,
    /// Entries with an unparseable date or value (Banxico uses "N/E")
    pub dropped: usize,
}

fn parse_rate(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Parse a SIE response body and keep the last observation of each month
pub fn parse_banxico_response(body: &str) -> Result<MonthlySeries> {
    let response: BmxResponse = serde_json::from_str(body)?;
    let series = response
        .bmx
        .series
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Fetch("response contains no series".to_string()))?;

    let mut daily: Vec<(NaiveDate, f64)> = Vec::with_capacity(series.datos.len());
    let mut dropped = 0;

    for observation in &series.datos {
        let date = NaiveDate::parse_from_str(observation.fecha.trim(), "%d/%m/%Y").ok();
        match (date, parse_rate(&observation.dato)) {
            (Some(date), Some(rate)) => daily.push((date, rate)),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "dropped unparseable FX observations");
    }

    daily.sort_by_key(|(date, _)| *date);

    let mut rates = BTreeMap::new();
    for (date, rate) in &daily {
        rates.insert(PeriodKey::from_date(*date), *rate);
    }

    Ok(MonthlySeries {
        rates,
        observations: daily.len(),
        dropped,
    })
}

/// Reject empty series and rates outside `[min_rate, max_rate]`
pub fn validate_rates(rates: &BTreeMap<PeriodKey, f64>, min_rate: f64, max_rate: f64) -> Result<()> {
    if rates.is_empty() {
        return Err(PipelineError::Fetch("FX series is empty".to_string()));
    }

    let out_of_range: Vec<String> = rates
        .iter()
        .filter(|(_, rate)| **rate < min_rate || **rate > max_rate)
        .map(|(period, rate)| format!("{}={:.4}", period, rate))
        .collect();

    if !out_of_range.is_empty() {
        return Err(PipelineError::Fetch(format!(
            "FX rates outside {:.2}..={:.2}: {}",
            min_rate,
            max_rate,
            out_of_range.join(", ")
        )));
    }

    Ok(())
}

// ============================================================================
// BANXICO CLIENT
// ============================================================================

pub struct BanxicoClient {
    client: Client,
    api_base: String,
    series_id: String,
    token: Option<String>,
    max_retries: u32,
    min_rate: f64,
    max_rate: f64,
}

impl BanxicoClient {
    pub fn from_config(config: &FxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Fetch(format!("building HTTP client: {}", e)))?;

        let token = config.resolved_token();
        if token.is_none() {
            warn!("no Banxico token configured; set BANXICO_TOKEN if the request is rejected");
        }

        Ok(BanxicoClient {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            series_id: config.series_id.clone(),
            token,
            max_retries: config.max_retries,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
        })
    }

    pub fn series_url(&self, first: PeriodKey, last: PeriodKey) -> Result<String> {
        let (Some(start), Some(end)) = (first.first_day(), last.last_day()) else {
            return Err(PipelineError::Fetch(format!("invalid range {}..{}", first, last)));
        };
        Ok(format!(
            "{}/series/{}/datos/{}/{}",
            self.api_base,
            self.series_id,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ))
    }

    fn get_once(&self, url: &str) -> Result<String> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Bmx-Token", token);
        }

        let response = request
            .send()
            .map_err(|e| PipelineError::Fetch(format!("GET {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(PipelineError::Fetch(
                "Banxico rejected the request (401): set a valid token in BANXICO_TOKEN or fx.token".to_string(),
            )),
            status if !status.is_success() => Err(PipelineError::Fetch(format!("HTTP {} from {}", status, url))),
            _ => response
                .text()
                .map_err(|e| PipelineError::Fetch(format!("reading body from {}: {}", url, e))),
        }
    }

    fn get_with_retry(&self, url: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url) {
                Ok(body) => return Ok(body),
                Err(e) if is_auth_failure(&e) => return Err(e),
                Err(e) if attempt <= self.max_retries => {
                    warn!(%url, attempt, error = %e, "retrying FX fetch");
                    sleep(RETRY_DELAY);
                }
                Err(e) => {
                    error!(%url, error = %e, "exhausted FX fetch retries");
                    return Err(e);
                }
            }
        }
    }
}

fn is_auth_failure(error: &PipelineError) -> bool {
    matches!(error, PipelineError::Fetch(message) if message.contains("(401)"))
}

impl FxSource for BanxicoClient {
    fn name(&self) -> &str {
        "banxico"
    }

    fn fetch_monthly(&self, first: PeriodKey, last: PeriodKey) -> Result<BTreeMap<PeriodKey, f64>> {
        let url = self.series_url(first, last)?;
        info!(series = %self.series_id, %first, %last, "fetching FX series");

        let body = self.get_with_retry(&url)?;
        let series = parse_banxico_response(&body)?;
        validate_rates(&series.rates, self.min_rate, self.max_rate)?;

        info!(
            observations = series.observations,
            dropped = series.dropped,
            months = series.rates.len(),
            "FX series reduced to month ends"
        );
        Ok(series.rates)
    }
}
