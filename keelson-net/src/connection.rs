//! One client session: a socket plus its pipeline pair.

use crate::frame::Frame;
use crate::proto::ConnectionStatus;
use crate::sock::client::ClientSock;
use keelson_core::pipeline::Pipeline;
use std::sync::Arc;
use tracing::error;

/// Pairing of one connected socket with the transforms applied to its
/// traffic. Exclusively owned by its endpoint.
pub struct ClientConnection {
    socket: Arc<ClientSock>,
    in_pipeline: Pipeline,
    out_pipeline: Pipeline,
}

impl ClientConnection {
    #[must_use]
    pub fn new(socket: Arc<ClientSock>, in_pipeline: Pipeline, out_pipeline: Pipeline) -> Self {
        Self {
            socket,
            in_pipeline,
            out_pipeline,
        }
    }

    #[must_use]
    pub fn socket(&self) -> &Arc<ClientSock> {
        &self.socket
    }

    #[must_use]
    pub fn in_pipeline(&self) -> &Pipeline {
        &self.in_pipeline
    }

    #[must_use]
    pub fn out_pipeline(&self) -> &Pipeline {
        &self.out_pipeline
    }

    /// Send a frame through the output pipeline onto the socket.
    ///
    /// Failures are logged; the return value reports success.
    pub fn send(&self, frame: &Frame) -> bool {
        let consumer = match frame.to_wire(&self.out_pipeline) {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "failed to assemble frame for sending");
                return false;
            }
        };
        if let Err(e) = self.socket.send_consumer(&consumer) {
            error!(error = %e, "failed to send frame to socket");
            return false;
        }
        true
    }

    /// Receive one frame through the input pipeline.
    #[must_use]
    pub fn receive(&self) -> Frame {
        Frame::read_from(&self.socket, &self.in_pipeline)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.socket.status()
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.socket.disconnect();
    }
}
