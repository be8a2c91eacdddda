pub mod table;
pub mod time_series;

use anyhow::Result;
use serde::Serialize;

use crate::config::{StreamingDataType, Subscription};
use crate::frame::Frame;
use crate::query::QueryResult;

use self::table::TableAggregator;
use self::time_series::TimeSeriesAggregator;

/// Aggregator shapes one subscription's tick results into frames.
///
/// Selected once at subscription start and held for the subscription's
/// lifetime. Enum dispatch keeps state ownership clear and avoids per-tick
/// mode checks.
pub enum Aggregator {
    TimeSeries(TimeSeriesAggregator),
    Table(TableAggregator),
}

impl Aggregator {
    /// Selects the aggregator for a subscription: time-series unless the
    /// mode is explicitly table. Non-streaming subscriptions riding in a
    /// streaming batch pass through as tables.
    pub fn for_subscription(sub: &Subscription) -> Result<Self> {
        if !sub.streaming || sub.data_type == StreamingDataType::Table {
            return Ok(Self::Table(TableAggregator::new(&sub.id)));
        }

        Ok(Self::TimeSeries(TimeSeriesAggregator::new(
            &sub.id,
            sub.capacity,
        )?))
    }

    /// Returns the mode label for logging.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::TimeSeries(_) => "time-series",
            Self::Table(_) => "table",
        }
    }

    /// Folds one tick's result into the aggregator and returns the updated
    /// frame.
    pub fn update(&mut self, result: &QueryResult) -> Frame {
        match self {
            Self::TimeSeries(agg) => agg.update(&result.fields),
            Self::Table(agg) => agg.update(result),
        }
    }
}

/// Delivery state attached to an emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmissionStatus {
    /// A streaming tick's updated frame.
    Streaming,
    /// A one-shot execution's final frame.
    Done,
    /// The tick's fetch failed; the stream continues on the next tick.
    Error { message: String },
}

/// One update published to the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emission {
    pub subscription_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
    #[serde(flatten)]
    pub status: EmissionStatus,
}

impl Emission {
    /// A streaming-tick emission carrying an updated frame.
    pub fn streaming(subscription_id: impl Into<String>, frame: Frame) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            frame: Some(frame),
            status: EmissionStatus::Streaming,
        }
    }

    /// A one-shot completion emission.
    pub fn done(subscription_id: impl Into<String>, frame: Frame) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            frame: Some(frame),
            status: EmissionStatus::Done,
        }
    }

    /// A failed-tick emission; carries no frame.
    pub fn error(subscription_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            frame: None,
            status: EmissionStatus::Error {
                message: message.into(),
            },
        }
    }
}
