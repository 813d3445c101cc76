use std::sync::Arc;

use cordial::{filter, ws::Event, Bot, Config};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            println!("{}", err);
            std::process::exit(1);
        }
    };

    let mut bot = Bot::new(config).unwrap();

    bot.subscribe(filter::kind("MESSAGE_CREATE"), |event: Arc<Event>| async move {
        log::info!("Message: {}", event.data);
    })
    .await;

    if let Err(err) = bot.run().await {
        log::error!("Bot stopped: {}", err);
        std::process::exit(if err.is_dead() { 2 } else { 1 });
    }
}
