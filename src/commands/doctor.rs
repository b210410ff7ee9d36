use clap::ArgMatches;

use pillar_bot_core::{BotConfig, ChannelSelection};
use pillar_channel_adapter::{DirectoryClient, MattermostApiClient};

pub async fn run(matches: &ArgMatches) {
    println!("🔍 Checking bot setup...\n");

    let config_path = matches
        .get_one::<String>("config")
        .expect("config has default value");

    print!("• Checking configuration... ");
    let config = match BotConfig::load(config_path) {
        Ok(config) => {
            println!("✓ {} is valid", config_path);
            config
        }
        Err(e) => {
            println!("✗ {}", e);
            fail();
        }
    };

    let client = match MattermostApiClient::new(&config.mattermost()) {
        Ok(client) => client,
        Err(e) => {
            println!("✗ {}", e);
            fail();
        }
    };

    print!("• Checking server {}... ", client.base_url());
    match client.ping().await {
        Ok(info) => println!(
            "✓ Reachable (version {})",
            info.version.as_deref().unwrap_or("unknown")
        ),
        Err(e) => {
            println!("✗ {}", e);
            fail();
        }
    }

    print!("• Checking credentials... ");
    let identity = match client.login(&config.email, &config.password).await {
        Ok(user) => {
            println!("✓ Logged in as {}", user.username);
            user
        }
        Err(e) => {
            println!("✗ {}", e);
            fail();
        }
    };
    if identity.username != config.username {
        println!(
            "  ○ Profile username '{}' will be updated to '{}'",
            identity.username, config.username
        );
    }

    print!("• Checking home team... ");
    let home = match client.get_team_by_name(&config.team).await {
        Ok(team) => {
            println!("✓ Found team {}", team.name);
            team
        }
        Err(e) => {
            println!("✗ Team {}: {}", config.team, e);
            fail();
        }
    };

    let mut all_ok = true;

    print!("• Checking debug channel... ");
    match client.get_channel_by_name(&config.debug_channel, &home.id).await {
        Ok(channel) => println!("✓ Found {}", channel.name),
        Err(_) => println!("○ {} does not exist yet (created on startup)", config.debug_channel),
    }

    let monitored = config.monitored_channel_name();
    if monitored != config.debug_channel {
        print!("• Checking monitored channel... ");
        match client.get_channel_by_name(monitored, &home.id).await {
            Ok(channel) => println!("✓ Found {}", channel.name),
            Err(e) => {
                println!("✗ {}: {}", monitored, e);
                all_ok = false;
            }
        }
    }

    for rule in &config.autoadd {
        print!("• Checking enrollment team {}... ", rule.team);
        let team = match client.get_team_by_name(&rule.team).await {
            Ok(team) => team,
            Err(e) => {
                println!("✗ {}", e);
                all_ok = false;
                continue;
            }
        };
        match &rule.selection {
            ChannelSelection::Static(names) => {
                let mut missing = Vec::new();
                for name in names {
                    if client.get_channel_by_name(name, &team.id).await.is_err() {
                        missing.push(name.as_str());
                    }
                }
                if missing.is_empty() {
                    println!("✓ {} channel(s) resolved", names.len());
                } else {
                    println!("⚠️  Missing channel(s): {}", missing.join(", "));
                    all_ok = false;
                }
            }
            ChannelSelection::AllPublicExcept(excluded) => {
                match client.list_public_channels(&team.id).await {
                    Ok(channels) => {
                        let count = channels
                            .iter()
                            .filter(|c| !excluded.contains(&c.name))
                            .count();
                        println!("✓ {} public channel(s) to enroll", count);
                    }
                    Err(e) => {
                        println!("✗ {}", e);
                        all_ok = false;
                    }
                }
            }
        }
    }

    println!();
    if all_ok {
        println!("✅ All checks passed! You're ready to run: pillar-bot up");
    } else {
        println!("⚠️  Some checks failed. The bot will start but may skip work");
    }
}

fn fail() -> ! {
    println!("\n⚠️  Fatal check failed. Fix the issue above before running pillar-bot up");
    std::process::exit(1);
}
