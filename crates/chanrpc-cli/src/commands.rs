//! `listen` and `send` subcommands.

use anyhow::{Context, Result};
use chanrpc_core::{BufferSource, Channeler, SeekableSource, TcpLink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// File name for the `index`-th received buffer.
pub fn received_file_name(index: usize) -> String {
    format!("received-{}.bin", index)
}

pub async fn listen(host: &str, port: u16, out_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;

    // Intentional stdout: scripts read the port from this line.
    println!("LISTEN_PORT={}", addr.port());
    info!("Listening on {}", addr);

    let link = TcpLink::accept(&listener).await?;
    info!("Peer connected from {}", link.peer_addr());

    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let channeler = Channeler::builder(link.sink())
        .name("listen")
        .on_data(move |data| {
            let _ = data_tx.send(data);
        })
        .on_peer_protocol_error(|e| warn!("Peer protocol error: {}", e))
        .build()?;

    let mut reader = tokio::spawn(link.run_reader(channeler.clone()));
    let mut written = 0;

    let reader_result = loop {
        tokio::select! {
            Some(data) = data_rx.recv() => {
                write_buffer(out_dir, written, &data).await?;
                written += 1;
            }
            result = &mut reader => break result,
        }
    };

    // Callbacks dispatched just before the peer hung up may still be in
    // flight; the channel ends once the channeler is gone.
    channeler.close();
    drop(channeler);
    while let Some(data) = data_rx.recv().await {
        write_buffer(out_dir, written, &data).await?;
        written += 1;
    }

    reader_result??;
    info!("Received {} buffers", written);
    Ok(())
}

async fn write_buffer(out_dir: &Path, index: usize, data: &[u8]) -> Result<PathBuf> {
    let path = out_dir.join(received_file_name(index));
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(path)
}

pub async fn send(addr: &str, files: &[PathBuf]) -> Result<()> {
    let link = TcpLink::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    let shutdown = link.shutdown_handle();

    let channeler = Channeler::builder(link.sink())
        .name("send")
        .on_peer_protocol_error(|e| warn!("Peer protocol error: {}", e))
        .build()?;
    let reader = tokio::spawn(link.run_reader(channeler.clone()));

    for file in files {
        let source = SeekableSource::open(file)
            .with_context(|| format!("failed to open {}", file.display()))?;
        let size = source.size()?;

        channeler
            .channel_source(Arc::new(source))
            .await
            .with_context(|| format!("failed to send {}", file.display()))?;

        // Intentional stdout: one line per delivered file.
        println!("SENT {} {}", file.display(), size);
    }

    channeler.close();
    shutdown.shutdown();
    reader.await??;
    Ok(())
}
