//! Charger link: transport and protocol engine wired together
//!
//! Builds the queues, the registry and both loops explicitly and runs them as
//! two tokio tasks sharing one cancellation token.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::link_channels;
use crate::config::LinkConfig;
use crate::engine::{ProtocolEngine, SessionSink};
use crate::error::LinkError;
use crate::frame::FrameDecoder;
use crate::registry::RegistryView;
use crate::transport::LineTransport;

/// Builder for a [`ChargerLink`]
pub struct LinkBuilder {
    config: LinkConfig,
    decoders: Vec<Box<dyn FrameDecoder>>,
    sink: Option<Box<dyn SessionSink>>,
    cancel: CancellationToken,
}

impl LinkBuilder {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            decoders: Vec::new(),
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Register an additional frame decoder
    pub fn decoder(mut self, decoder: Box<dyn FrameDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    /// Receive completed sessions
    pub fn sink(mut self, sink: Box<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stop the link when this token is cancelled
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawn transport and engine on the current runtime
    pub fn spawn<R, W>(self, reader: R, writer: W) -> Result<ChargerLink, LinkError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut engine = ProtocolEngine::new(&self.config)?;
        for decoder in self.decoders {
            engine = engine.with_decoder(decoder);
        }
        if let Some(sink) = self.sink {
            engine = engine.with_sink(sink);
        }

        let sessions = engine.sessions();
        let (transport_ends, engine_ends) = link_channels();
        let transport = LineTransport::new(reader, writer, &self.config);

        let transport = tokio::spawn(transport.run(transport_ends, self.cancel.clone()));
        let engine = tokio::spawn(engine.run(engine_ends, self.cancel.clone()));

        info!(
            "Charger link started (response timeout {:?})",
            self.config.response_timeout
        );

        Ok(ChargerLink {
            sessions,
            cancel: self.cancel,
            transport,
            engine,
        })
    }
}

/// A running charger link
pub struct ChargerLink {
    sessions: RegistryView,
    cancel: CancellationToken,
    transport: JoinHandle<io::Result<()>>,
    engine: JoinHandle<()>,
}

impl ChargerLink {
    pub fn builder(config: LinkConfig) -> LinkBuilder {
        LinkBuilder::new(config)
    }

    /// Spawn a link with the default decoders and log sink
    pub fn spawn<R, W>(config: LinkConfig, reader: R, writer: W) -> Result<Self, LinkError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        LinkBuilder::new(config).spawn(reader, writer)
    }

    /// Read-only view of the open sessions
    pub fn sessions(&self) -> RegistryView {
        self.sessions.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether both loops have exited
    pub fn is_finished(&self) -> bool {
        self.transport.is_finished() && self.engine.is_finished()
    }

    /// Signal shutdown and wait for both loops to exit
    pub async fn stop(self) -> Result<(), LinkError> {
        self.cancel.cancel();

        let transport = self.transport.await?;
        self.engine.await?;
        transport?;

        info!("Charger link stopped");
        Ok(())
    }
}
