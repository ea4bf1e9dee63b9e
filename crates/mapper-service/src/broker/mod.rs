//! Message broker integration
//!
//! [`consumer::QueueConsumer`] drives the pipeline from any
//! [`consumer::DeliverySource`]; [`amqp::AmqpDeliverySource`] is the
//! production source.

pub mod amqp;
pub mod consumer;
pub mod tls;

pub use amqp::{AmqpDeliverySource, BrokerEndpoint};
pub use consumer::{ConsumerStats, Delivery, DeliverySource, QueueConsumer};
pub use tls::{build_client_config, tls_connector, TlsError, TlsSettings};
