//! Process-wide application state.
//!
//! Everything a handler needs is an explicit dependency carried here; the
//! only process-global is the configuration it was built from.

use std::sync::Arc;

use tracing::info;

use crate::backend::OrderClient;
use crate::config::BridgeConfig;
use crate::llm::RealtimeOptions;
use crate::tools::email::{EmailAdapter, HttpEmailer, NoopEmailer};
use crate::tools::ToolDispatcher;
use crate::transcript::{NoopSink, RestSink, TranscriptSink};

pub struct AppState {
    pub config: BridgeConfig,
    pub orders: Arc<OrderClient>,
    pub transcripts: Arc<dyn TranscriptSink>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let orders = Arc::new(OrderClient::new(
            config.orders_base_url.clone(),
            config.orders_client_id.clone().unwrap_or_default(),
            config.orders_client_secret.clone().unwrap_or_default(),
            config.orders_refresh_token.clone().unwrap_or_default(),
        ));

        let transcripts: Arc<dyn TranscriptSink> = match (
            config.transcript_store_url.clone(),
            config.transcript_store_key.clone(),
        ) {
            (Some(url), Some(key)) => Arc::new(RestSink::new(url, key)),
            _ => {
                info!("transcript store not configured, transcripts disabled");
                Arc::new(NoopSink)
            }
        };

        let email: Arc<dyn EmailAdapter> = match (
            config.email_gateway_url.clone(),
            config.email_gateway_key.clone(),
        ) {
            (Some(url), Some(key)) => {
                Arc::new(HttpEmailer::new(url, key, config.email_from.clone()))
            }
            _ => {
                info!("email gateway not configured, email tool degrades to no-op");
                Arc::new(NoopEmailer)
            }
        };

        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&orders),
            email,
            config.shop_name.clone(),
        ));

        Arc::new(Self {
            config,
            orders,
            transcripts,
            dispatcher,
        })
    }

    /// Connection settings for a new call's LLM session.
    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            api_key: self.config.openai_api_key.clone().unwrap_or_default(),
            model: self.config.realtime_model.clone(),
            voice: self.config.realtime_voice.clone(),
        }
    }
}
