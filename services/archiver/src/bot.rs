//! Update dispatch: long polling, command routing and replies

use crate::commands::{Command, CommandHandler};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, ParseMode, ReplyParameters};
use teloxide::update_listeners::Polling;
use tracing::{debug, info};

/// Handler tree: text messages that parse as one of our commands
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .filter(|msg: Message| {
            debug!("Message {} from chat {}", msg.id.0, msg.chat.id.0);
            true
        })
        .filter_command::<Command>()
        .endpoint(answer)
}

async fn answer(
    bot: Bot,
    msg: Message,
    command: Command,
    handler: Arc<CommandHandler>,
) -> ResponseResult<()> {
    let reply = handler.handle(&msg, command).await;
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

/// Poll until Ctrl-C, then wait for saves that are still running
pub async fn run(bot: Bot, handler: Arc<CommandHandler>, poll_timeout: Duration) {
    info!("Polling for updates (timeout {}s)", poll_timeout.as_secs());

    let listener = Polling::builder(bot.clone())
        .timeout(poll_timeout)
        .allowed_updates(vec![AllowedUpdate::Message])
        .delete_webhook()
        .await
        .build();

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![handler.clone()])
        // Every update runs concurrently; a slow download never holds up /stats
        .distribution_function(|_| None::<Infallible>)
        .default_handler(|update| async move {
            debug!("Ignored update {}", update.id.0);
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("Error polling updates"),
        )
        .await;

    info!("Waiting for in-flight saves");
    handler.finish_pending_saves().await;
    info!("Shutting down archiver");
}
