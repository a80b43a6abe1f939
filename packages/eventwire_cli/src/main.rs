use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eventwire::broker::MemoryBroker;
use eventwire::registry::{subject_for, CachedRegistry, HttpRegistry, MemoryRegistry, SchemaRegistry};
use eventwire::{
    wire, AvroCodec, CborCodec, Codec, Describe, Envelope, EventwireConfig, JsonCodec, Metadata,
    Publisher, PublisherConfig, RegistryConfig, Schema, Subscriber, SubscriberConfig, Verdict,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "eventwire", version, about = "Typed domain events over schema-registry framed brokers")]
struct Cli {
    /// JSON config file (registry urls, publisher topic, subscription)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled schema of a demo payload type
    Schema {
        #[arg(value_enum, default_value_t = DemoType::Book)]
        payload: DemoType,
        #[arg(long)]
        pretty: bool,
    },
    /// Frame a body with a schema id and print the result as hex
    Frame {
        #[arg(long)]
        schema_id: u32,
        /// Body as hex
        #[arg(long, conflicts_with = "text")]
        hex: Option<String>,
        /// Body as UTF-8 text
        #[arg(long)]
        text: Option<String>,
    },
    /// Split a hex-encoded frame into schema id and body
    Unframe { frame: String },
    /// Publish events through an in-memory broker and dispatch them
    Demo {
        #[arg(long, default_value_t = 6)]
        count: usize,
        #[arg(long, value_enum, default_value_t = CodecKind::Json)]
        codec: CodecKind,
        #[arg(long, default_value = "books")]
        topic: String,
        /// Log every received message
        #[arg(short, long)]
        verbose: bool,
    },
    /// Register a demo schema with an HTTP schema registry
    Register {
        #[arg(value_enum, default_value_t = DemoType::Book)]
        payload: DemoType,
        /// Comma-separated registry urls; overrides the config file
        #[arg(long)]
        registry: Option<String>,
        #[arg(long, default_value = "books")]
        topic: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DemoType {
    Book,
    Event,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodecKind {
    Json,
    Avro,
    Cbor,
}

#[derive(Debug, Clone, Serialize, Deserialize, Describe)]
struct Book {
    id: String,
    author_id: String,
    status: String,
    pages: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Describe)]
struct Properties {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Describe)]
struct Event {
    id: String,
    #[serde(rename = "eventName")]
    event_name: String,
    platform: String,
    properties: Vec<Properties>,
}

impl DemoType {
    fn schema(self) -> Result<Schema> {
        Ok(match self {
            DemoType::Book => Schema::of::<Book>()?,
            DemoType::Event => Schema::of::<Event>()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EventwireConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EventwireConfig::default(),
    };

    match cli.command {
        Commands::Schema { payload, pretty } => {
            let schema = payload.schema()?;
            if pretty {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                println!("{}", schema);
            }
            println!("fingerprint: {}", schema.fingerprint());
        }
        Commands::Frame {
            schema_id,
            hex: hex_body,
            text,
        } => {
            let body = match (hex_body, text) {
                (Some(h), None) => hex::decode(h.trim()).context("body is not valid hex")?,
                (None, Some(t)) => t.into_bytes(),
                _ => bail!("pass exactly one of --hex or --text"),
            };
            println!("{}", hex::encode(wire::encode(schema_id, &body)));
        }
        Commands::Unframe { frame } => {
            let bytes = hex::decode(frame.trim()).context("frame is not valid hex")?;
            let (schema_id, body) = wire::decode(&bytes)?;
            println!("schema id: {}", schema_id);
            match std::str::from_utf8(body) {
                Ok(text) => println!("body: {}", text),
                Err(_) => println!("body (hex): {}", hex::encode(body)),
            }
        }
        Commands::Demo {
            count,
            codec,
            topic,
            verbose,
        } => {
            let publisher_config = config
                .publisher
                .clone()
                .unwrap_or_else(|| PublisherConfig::new(topic));
            let subscriber_config = config
                .subscriber
                .clone()
                .unwrap_or_else(|| SubscriberConfig::new(format!("{}-demo", publisher_config.topic)))
                .verbose(verbose);
            match codec {
                CodecKind::Json => run_demo(JsonCodec, publisher_config, subscriber_config, count).await?,
                CodecKind::Avro => run_demo(AvroCodec, publisher_config, subscriber_config, count).await?,
                CodecKind::Cbor => run_demo(CborCodec, publisher_config, subscriber_config, count).await?,
            }
        }
        Commands::Register {
            payload,
            registry,
            topic,
        } => {
            let registry_config = match registry {
                Some(urls) => RegistryConfig::from_addresses(&urls),
                None => config
                    .registry
                    .ok_or_else(|| anyhow!("no registry configured; pass --registry"))?,
            };
            let client = HttpRegistry::new(&registry_config)?;
            let schema = payload.schema()?;
            let subject = subject_for(&topic);
            let id = client.register_schema(&subject, &schema).await?;
            println!("{} registered under {} with id {}", schema.name(), subject, id);
        }
    }

    Ok(())
}

/// Publish `count` book events, cycling through `create`, `inactive` and an
/// event nobody handles, and dispatch them through a subscriber.
async fn run_demo<C: Codec + Clone>(
    codec: C,
    publisher_config: PublisherConfig,
    subscriber_config: SubscriberConfig,
    count: usize,
) -> Result<()> {
    let broker = MemoryBroker::new();
    let registry = Arc::new(CachedRegistry::new(MemoryRegistry::new()));
    let topic = publisher_config.topic.clone();
    let subscription = broker.subscribe(&topic, &subscriber_config.subscription);

    let publisher = Publisher::<Book, C>::new(publisher_config, broker.clone(), registry.clone(), codec.clone())?;
    info!("Using {} bodies on topic {}", codec.name(), publisher.topic());

    let created = Arc::new(AtomicUsize::new(0));
    let mut subscriber = Subscriber::<Book, C>::new(subscriber_config, codec)?.with_registry(registry.clone());
    {
        let created = created.clone();
        subscriber.register("create", move |envelope: Envelope<Book>| {
            let created = created.clone();
            async move {
                info!("Created book {} ({} pages)", envelope.payload.id, envelope.payload.pages);
                created.fetch_add(1, Ordering::SeqCst);
                Verdict::ack()
            }
        })?;
    }
    subscriber.register("inactive", |envelope: Envelope<Book>| async move {
        Verdict::nack().with_error(anyhow!("book {} is inactive, leaving it for later", envelope.payload.id))
    })?;

    let cancel = CancellationToken::new();
    let consumer = {
        let cancel = cancel.clone();
        let subscription = subscription.clone();
        tokio::spawn(async move { subscriber.subscribe(&*subscription, &cancel).await })
    };

    let events = ["create", "inactive", "archive"];
    let mut handles = Vec::new();
    for i in 0..count {
        let book = Book {
            id: format!("book-{}", i),
            author_id: format!("author-{}", i % 3),
            status: "active".to_string(),
            pages: 100 + i as i32,
        };
        let envelope = Envelope::new(book, Metadata::new(events[i % events.len()], "eventwire-demo", format!("book-{}", i)));
        if i % 2 == 0 {
            let receipt = publisher.publish_sync(&cancel, &envelope).await?;
            info!("{}", receipt);
        } else {
            handles.push(publisher.publish_async(&cancel, &envelope)?);
        }
    }
    for handle in handles {
        let receipt = handle.await?;
        info!("{}", receipt);
    }
    broker.close();

    tokio::select! {
        result = consumer => result??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            cancel.cancel();
        }
    }

    println!(
        "published {} on {}, handled {} creates, acked {}, left pending {}",
        count,
        topic,
        created.load(Ordering::SeqCst),
        subscription.acked_count(),
        subscription.pending_count()
    );
    Ok(())
}
