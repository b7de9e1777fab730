//! HTTP-backed readers
//!
//! Balance endpoint: `GET {endpoint}/{chain}/{contract}/{owner}` returning
//! `{"quantity": "<decimal or 0x-hex>"}`.
//! Badge endpoint: `GET {url}/{owner}` returning a JSON array of badges.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use holdings_core::{
    parse_quantity, BadgeDescriptor, ContractRef, OwnerId, Quantity, SourceError, SourceResult,
};

use crate::badges::BadgeLister;
use crate::source::BalanceReader;

#[derive(Debug, Deserialize)]
struct QuantityResponse {
    quantity: String,
}

fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        url.push('/');
        url.push_str(segment);
    }
    url
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

pub struct HttpBalanceReader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBalanceReader {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn url_for(&self, contract: &ContractRef, owner: &OwnerId) -> String {
        join_url(
            &self.endpoint,
            &[contract.chain.as_str(), &contract.address, owner.as_str()],
        )
    }
}

#[async_trait]
impl BalanceReader for HttpBalanceReader {
    async fn read_quantity(&self, contract: &ContractRef, owner: &OwnerId) -> SourceResult<Quantity> {
        let url = self.url_for(contract, owner);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: QuantityResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        parse_quantity(&body.quantity).ok_or_else(|| SourceError::Contract {
            contract: contract.clone(),
            message: format!("unparseable quantity {:?}", body.quantity),
        })
    }
}

pub struct HttpBadgeLister {
    client: reqwest::Client,
    url: String,
}

impl HttpBadgeLister {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url_for(&self, owner: &OwnerId) -> String {
        join_url(&self.url, &[owner.as_str()])
    }
}

#[async_trait]
impl BadgeLister for HttpBadgeLister {
    async fn list_badges(&self, owner: &OwnerId) -> SourceResult<Vec<BadgeDescriptor>> {
        let url = self.url_for(owner);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Listing(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Listing(format!("status {} from {}", status.as_u16(), url)));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Listing(format!("invalid listing: {}", e)))
    }
}
