use bevy::log::{Level, LogPlugin};
use bevy::prelude::*;
use clap::Parser;

use hardstep::cli::{Args, handle_list_schemes, load_and_apply_config};
use hardstep::plugins::HardStepPlugin;

fn main() -> AppExit {
    let args = Args::parse();

    if args.list_schemes {
        handle_list_schemes();
        return AppExit::Success;
    }

    let config = match load_and_apply_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return AppExit::error();
        }
    };

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins,
        LogPlugin {
            level: if args.verbose { Level::DEBUG } else { Level::INFO },
            ..default()
        },
        HardStepPlugin::new(config),
    ));
    info!("hardstep built {}", env!("BUILD_DATE"));

    app.run()
}
