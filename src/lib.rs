//! # Sift
//!
//! Generic record filtering and resilient notification delivery.
//!
//! ## Core Concepts
//!
//! - **Filter sources**: a query-parameter map or a structured filter record
//! - **Compiled conditions**: the AND of per-field predicates, validated
//!   against the entity schema up front
//! - **Record tables**: execute conditions with paging and sorting
//! - **Resilient notifier**: publishes to a queue behind a circuit breaker
//!   and mails directly when the queue is unavailable
//!
//! ## Example
//!
//! ```ignore
//! use sift::{build_condition, EntitySchema, FilterSource, PageRequest, RecordTable};
//!
//! let table = RecordTable::new(EntitySchema::new("employee", ["fullname", "designation"]));
//! table.insert_json(&json!({"fullname": "Hannah Smith", "designation": "engineer"}))?;
//!
//! let params = json!({"fullname": "ann", "page": 0, "size": 10});
//! let params = params.as_object().unwrap();
//! let condition = build_condition(table.schema(), FilterSource::Map(params))?;
//! let page = table.find_page(&condition, &PageRequest::from_params(params)?)?;
//! ```

pub mod codegen;
pub mod config;
pub mod error;
pub mod filter;
pub mod notify;
pub mod records;
pub mod types;

// Re-exports
pub use codegen::{AtomicSequence, CodeGenerator, SequenceGenerator};
pub use config::SiftConfig;
pub use error::{
    BrokerError, ConsumeError, DeliveryError, FallbackFailure, MailError, QueryError, Result,
    SequenceError,
};
pub use filter::{
    build_condition, compile, extract_fields, is_reserved, plan_predicates, select_strategy,
    Comparison, CompiledCondition, DeclaredField, FieldPredicate, FilterSource, FilterValue,
    Introspectable, SourcePath, Strategy, ToFilterValue, RESERVED_KEYS,
};
pub use notify::{
    BreakerMetrics, Broker, CircuitBreaker, CircuitBreakerConfig, CircuitState, ConsumerStats,
    Delivery, MailConfig, MailTransport, Mailer, NotificationConsumer, NotificationKind,
    NotificationMessage, NotifierConfig, OutgoingEmail, Outbox, QueueBroker, QueueConfig,
    QueueReceiver, ResilientNotifier, TemplateMailer,
};
pub use records::{Page, PageRequest, RecordTable, Sort, SortDirection};
pub use types::*;
