/// Request/response endpoints of the screener backend
///
/// [`ScreenerApi`] is the seam between the dashboard and the network; the
/// dashboard only ever talks to the trait so tests can swap in a fake.

use crate::shared::{
    error::ScreenerError,
    types::{CrossoverRecord, ScreenerSnapshot, Settings, Symbol, Timeframe},
};
use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Timeout applied to every request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ScreenerApi: Send + Sync {
    /// `GET all-symbols`
    async fn all_symbols(&self) -> Result<Vec<Symbol>, ScreenerError>;

    /// `GET watchlist`
    async fn watchlist(&self) -> Result<Vec<Symbol>, ScreenerError>;

    /// `POST watchlist`, returns the server's full watchlist
    async fn add_to_watchlist(&self, symbol: &Symbol) -> Result<Vec<Symbol>, ScreenerError>;

    /// `DELETE watchlist/{symbol}`, returns the server's full watchlist
    async fn remove_from_watchlist(&self, symbol: &Symbol) -> Result<Vec<Symbol>, ScreenerError>;

    /// `POST screener_data`
    async fn screener_data(
        &self,
        symbols: &[Symbol],
        settings: &Settings,
    ) -> Result<ScreenerSnapshot, ScreenerError>;

    /// `GET historical-crossovers`
    async fn historical_crossovers(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Vec<CrossoverRecord>, ScreenerError>;
}

#[derive(Debug, Deserialize)]
struct SymbolsResponse {
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct WatchlistResponse {
    #[serde(default)]
    watchlist: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct CrossoversResponse {
    #[serde(default)]
    crossovers: Vec<CrossoverRecord>,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddSymbolRequest<'a> {
    symbol: &'a Symbol,
}

#[derive(Debug, Serialize)]
struct ScreenerDataRequest<'a> {
    symbols: &'a [Symbol],
    short_ema: u32,
    long_ema: u32,
}

/// [`ScreenerApi`] over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpScreenerApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpScreenerApi {
    pub fn new(base_url: &str) -> Result<Self, ScreenerError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScreenerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScreenerError::Validation(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ScreenerError> {
        let response = request.send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        debug!(%method, %url, "screener request");
        self.client.request(method, url)
    }
}

/// Map non-2xx responses to [`ScreenerError::ServerRejection`], reading the
/// server's `detail` reason when one is present
async fn check_status(response: Response) -> Result<Response, ScreenerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let reason = match response.json::<RejectionBody>().await {
        Ok(RejectionBody {
            detail: Some(detail),
        }) => detail,
        _ => fallback,
    };

    warn!(status = status.as_u16(), %reason, "server rejected request");
    Err(ScreenerError::ServerRejection {
        status: status.as_u16(),
        reason,
    })
}

#[async_trait]
impl ScreenerApi for HttpScreenerApi {
    async fn all_symbols(&self) -> Result<Vec<Symbol>, ScreenerError> {
        let url = self.endpoint(&["all-symbols"])?;
        let body: SymbolsResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(body.symbols)
    }

    async fn watchlist(&self) -> Result<Vec<Symbol>, ScreenerError> {
        let url = self.endpoint(&["watchlist"])?;
        let body: SymbolsResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(body.symbols)
    }

    async fn add_to_watchlist(&self, symbol: &Symbol) -> Result<Vec<Symbol>, ScreenerError> {
        let url = self.endpoint(&["watchlist"])?;
        let request = self
            .request(Method::POST, url)
            .json(&AddSymbolRequest { symbol });
        let body: WatchlistResponse = self.send_json(request).await?;
        Ok(body.watchlist)
    }

    async fn remove_from_watchlist(&self, symbol: &Symbol) -> Result<Vec<Symbol>, ScreenerError> {
        let url = self.endpoint(&["watchlist", symbol.as_str()])?;
        let body: WatchlistResponse = self.send_json(self.request(Method::DELETE, url)).await?;
        Ok(body.watchlist)
    }

    async fn screener_data(
        &self,
        symbols: &[Symbol],
        settings: &Settings,
    ) -> Result<ScreenerSnapshot, ScreenerError> {
        let url = self.endpoint(&["screener_data"])?;
        let request = self.request(Method::POST, url).json(&ScreenerDataRequest {
            symbols,
            short_ema: settings.short_period,
            long_ema: settings.long_period,
        });
        self.send_json(request).await
    }

    async fn historical_crossovers(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Vec<CrossoverRecord>, ScreenerError> {
        let mut url = self.endpoint(&["historical-crossovers"])?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol.as_str())
            .append_pair("timeframe", timeframe.as_str());
        let body: CrossoversResponse = self.send_json(self.request(Method::GET, url)).await?;
        Ok(body.crossovers)
    }
}
