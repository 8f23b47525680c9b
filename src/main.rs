use std::sync::Arc;
use clap::Parser;

use bch_sweep_gateway::backend::{BlockbookClient, NodeBroadcaster, SlpIndexerClient};
use bch_sweep_gateway::cli::{CliArgs, parse_network};
use bch_sweep_gateway::server::{AppState, create_router};
use bch_sweep_gateway::{SweepEngine, SweepError, SweepPolicy};

#[tokio::main]
async fn main() -> Result<(), SweepError> {
    env_logger::init();

    let args = CliArgs::parse();
    log::info!(
        "アプリケーションを開始します。listen={}, network={}, indexer={}, slp={}, node={}",
        args.listen,
        args.network,
        args.indexer_url,
        args.slp_url,
        args.node_url
    );

    let network = parse_network(&args.network)?;
    log::info!("指定されたネットワーク: {:?}", network);

    let indexer = Arc::new(BlockbookClient::new(&args.indexer_url, args.timeout())?);
    let classifier = Arc::new(SlpIndexerClient::new(&args.slp_url, args.timeout())?);
    let broadcaster = Arc::new(NodeBroadcaster::new(&args.node_url, args.node_auth(), args.timeout())?);

    let engine = SweepEngine::new(
        network,
        SweepPolicy::default(),
        indexer.clone(),
        indexer,
        classifier,
        broadcaster,
    );
    let app = create_router(Arc::new(AppState { engine }));

    let listener = tokio::net::TcpListener::bind(args.listen).await.map_err(|e| {
        log::error!("待ち受けアドレスのバインドに失敗しました: {}", args.listen);
        SweepError::Internal(e.to_string())
    })?;
    log::info!("HTTPサーバーを開始しました: http://{}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Ctrl+C ハンドラの設定に失敗しました: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .map_err(|e| SweepError::Internal(e.to_string()))?;

    log::info!("処理が正常に完了しました。");
    Ok(())
}
