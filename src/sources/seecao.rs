use serde_json::json;

use crate::schema::{CollectionTask, Dataset, Horizon};

use super::collector::SourceCollector;

/// SEECAO (South East Europe Coordinated Auction Office) collector
///
/// Fetches allocation results from the SEECAO public API. Unlike
/// JAO, SEECAO accepts day-exact windows for both horizons; the
/// horizon only selects the product granularity.
pub struct SeecaoCollector {
    http: reqwest::Client,
}

const BASE_URL: &str = "https://www.seecao.com/api";

impl SeecaoCollector {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl SourceCollector for SeecaoCollector {
    fn name(&self) -> &'static str {
        "SEECAO"
    }

    async fn collect(&self, task: &CollectionTask) -> anyhow::Result<Dataset> {
        let product = match task.horizon {
            Horizon::Monthly => "monthly",
            Horizon::Yearly => "yearly",
        };

        let from = task.start.format("%Y-%m-%d").to_string();
        let to = task.end.format("%Y-%m-%d").to_string();

        let rows: Dataset = self
            .http
            .get(format!("{BASE_URL}/results"))
            .query(&[
                ("product", product),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(json!({
            "source": self.name(),
            "horizon": task.horizon.as_str(),
            "from": task.start.to_rfc3339(),
            "to": task.end.to_rfc3339(),
            "auctions": rows,
        }))
    }
}
