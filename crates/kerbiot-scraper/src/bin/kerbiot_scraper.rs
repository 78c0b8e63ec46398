use anyhow::Context;
use argh::FromArgs;
use kerbiot_scraper::scheduler::shutdown_channel;
use kerbiot_scraper::{Config, MqttPublisher, Scraper, WeatherComClient, VERSION};

#[derive(FromArgs)]
/// Publish weather and air quality readings to an MQTT broker
struct Args {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "String::from(\"scraper.yaml\")")]
    config: String,

    /// run a single cycle and exit
    #[argh(switch)]
    once: bool,

    /// print version information and exit
    #[argh(switch, short = 'V')]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();
    if args.version {
        println!("kerbiot_scraper {}", VERSION);
        return Ok(());
    }

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config from '{}': {}", args.config, e);
            std::process::exit(1);
        }
    };
    log::info!(
        "Loaded {} location(s) from '{}'",
        config.locations.len(),
        args.config
    );

    let publisher = match MqttPublisher::connect(&config.mqtt).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to connect to MQTT broker: {}", e);
            std::process::exit(1);
        }
    };

    let source = WeatherComClient::new(&config.base_url, config.request_timeout())
        .context("failed to build HTTP client")?;

    let shutdown_rx = shutdown_channel(|trigger| {
        ctrlc::set_handler(move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            trigger();
        })
    })
    .context("failed to set Ctrl+C handler")?;

    let scraper = Scraper::new(config.scrape_settings(), source, publisher);
    let result = if args.once {
        scraper.run_cycle(Some(&shutdown_rx)).await.map(|_| ())
    } else {
        scraper.run(shutdown_rx).await
    };

    scraper.into_publisher().disconnect().await;

    if let Err(e) = result {
        log::error!("Stopping: {}", e);
        std::process::exit(1);
    }

    log::info!("Scraper shut down, exiting");
    Ok(())
}
