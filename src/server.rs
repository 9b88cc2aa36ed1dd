use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::FrameCodec;
use crate::commands::executable::Executable;
use crate::commands::{Command, CommandParserError};
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Binds the listener described by `config` and serves clients until an unrecoverable error.
pub async fn run(config: Config) -> Result<(), Error> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;

    info!("Redis server listening on {}", listener.local_addr()?);

    serve(listener, Store::new(), config).await
}

/// Accepts clients from `listener`, each one served by its own task against the shared `store`.
///
/// At most `config.max_connections` clients are served at a time. A slot is taken before
/// accepting, so once all of them are in use new clients wait in the listen backlog until someone
/// disconnects. Errors of a single connection end that connection only.
pub async fn serve(listener: TcpListener, store: Store, config: Config) -> Result<(), Error> {
    let config = Arc::new(config);
    let slots = Arc::new(Semaphore::new(config.connection_slots()));

    loop {
        let permit = slots.clone().acquire_owned().await?;

        let (socket, client_address) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually running out of file descriptors, give others a moment to close theirs.
                error!("Failed to accept connection: {}", e);
                sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let store = store.clone();
        let config = config.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, store, config).await {
                error!("Connection error: {}", e);
            }
            drop(permit);
        });
    }
}

#[instrument(
    name = "connection",
    skip(stream, store, config),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    config: Arc<Config>,
) -> Result<(), Error> {
    let codec = FrameCodec::new(config.max_frame_size, config.nesting_depth());
    let mut conn = Connection::with_codec(stream, client_address, codec);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    while let Some(frame) = conn.read_frame().await? {
        debug!("Received frame from client: {}", frame);

        let res = match Command::try_from(frame) {
            Ok(cmd) => match cmd.exec(store.clone()) {
                Ok(res) => res,
                Err(e) => Frame::Error(format!("ERR {}", e)),
            },
            Err(CommandParserError::UnknownCommand { command }) => {
                warn!("Unknown command {:?}", command);
                if !config.reply_unknown_commands {
                    continue;
                }
                Frame::Error(format!("ERR unknown command '{}'", command))
            }
            Err(e) => {
                warn!("Invalid command: {}", e);
                Frame::Error(format!("ERR {}", e))
            }
        };

        debug!("Sending response to client: {}", res);
        conn.write_frame(&res).await?;
    }

    info!("Connection closed");
    Ok(())
}
