use std::sync::Arc;

use moderation_warden::config::{self, BotConfig};
use moderation_warden::platform::SerenityPlatform;
use moderation_warden::{BOT_NAME, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config = BotConfig::load()?;
    logging::init(&config.log_dir)?;

    let token = config::discord_token()?;

    // Restore the ledger, pending grants and access policy
    let http = Arc::new(serenity::Http::new(&token));
    let platform = Arc::new(SerenityPlatform::new(http, config.log_channel_id));
    let data = Data::load(config, platform).await?;
    let setup_data = data.clone();

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Error while handling error: {e}");
                    }
                })
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::on_event(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                // Overdue grants are settled before the first command runs
                let report = setup_data.start().await?;
                info!(
                    reversed = report.reversed,
                    armed = report.armed,
                    failed = report.failed,
                    reconciled = report.reconciled,
                    "Pending grants recovered"
                );
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(setup_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_data = data.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("Received shutdown signal, starting graceful shutdown");
        shard_manager.shutdown_all().await;
        if let Err(e) = shutdown_data.shutdown().await {
            error!("Failed to flush moderation data: {e}");
        }
    });

    info!("Starting {BOT_NAME}...");
    if let Err(err) = client.start().await {
        error!("Error starting the bot: {err}");
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
