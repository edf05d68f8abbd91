//! Command line surface of the `swarmhive` binary.

use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub verbose: bool,
    pub role: String,
    pub name: String,
    pub zenoh_mode: String,
    pub zenoh_connect: Option<String>,
    pub zenoh_listen: Option<String>,
    pub no_multicast: bool,
    pub bus_prefix: String,
    pub scenario_dirs: Vec<String>,
    pub no_default_scenarios: bool,
    pub controller_image: String,
    pub tick_interval_ms: u64,
    pub confirmation_retention_secs: u64,
    /// Raw `SWARM_ID=SCENARIO_ID` requests, see [`CliConfig::swarm_requests`]
    pub swarms: Vec<String>,
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow!("missing value for --{}", id))
}

fn repeated(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

impl CliConfig {
    pub fn from_args() -> Result<Self> {
        Self::from_matches(&Self::build_cli().get_matches())
    }

    /// Tests feed pre-parsed matches through here.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            verbose: matches.get_flag("verbose"),
            role: required(matches, "role")?,
            name: required(matches, "name")?,
            zenoh_mode: required(matches, "zenoh-mode")?,
            zenoh_connect: matches.get_one::<String>("zenoh-connect").cloned(),
            zenoh_listen: matches.get_one::<String>("zenoh-listen").cloned(),
            no_multicast: matches.get_flag("no-multicast"),
            bus_prefix: required(matches, "bus-prefix")?,
            scenario_dirs: repeated(matches, "scenario-dir"),
            no_default_scenarios: matches.get_flag("no-default-scenarios"),
            controller_image: required(matches, "controller-image")?,
            tick_interval_ms: required(matches, "tick-interval-ms")?,
            confirmation_retention_secs: required(matches, "confirmation-retention-secs")?,
            swarms: repeated(matches, "swarm"),
        })
    }

    pub fn build_cli() -> Command {
        Command::new("swarmhive")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Swarmhive - swarm orchestrator and scenario controller")
            .long_about("Provisions swarm controllers through a container runtime, starts them once \
                       they report ready on the control plane, and replays scenario timelines \
                       against running swarms.")
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(ArgAction::SetTrue)
                    .help("Log at debug level")
                    .long_help("Log at debug level: every control-plane message, timeline step \
                              and container runtime call shows up."),
            )
            .arg(
                Arg::new("role")
                    .short('r')
                    .long("role")
                    .value_name("ROLE")
                    .env("SWARMHIVE_ROLE")
                    .help("Service role: orchestrator or controller")
                    .long_help("Which service this process runs. The orchestrator owns swarm \
                              lifecycles; a controller is started by the orchestrator inside a \
                              container and drives one swarm's timeline.")
                    .value_parser(["orchestrator", "controller"])
                    .required(false)
                    .default_value("orchestrator"),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("NAME")
                    .help("Name for this orchestrator instance")
                    .required(false)
                    .default_value("default"),
            )
            .arg(
                Arg::new("zenoh-mode")
                    .long("zenoh-mode")
                    .value_name("MODE")
                    .help("Bus session mode (peer or client)")
                    .long_help("A peer talks to other peers directly and may route for them. \
                              A client only attaches to an existing router.")
                    .value_parser(["peer", "client"])
                    .required(false)
                    .default_value("peer"),
            )
            .arg(
                Arg::new("zenoh-connect")
                    .long("zenoh-connect")
                    .value_name("ENDPOINTS")
                    .env("SWARMHIVE_ZENOH_CONNECT")
                    .help("Endpoints to dial, comma separated")
                    .long_help("Endpoints to dial, comma separated, e.g. tcp/192.168.1.1:7447. \
                              Provisioned controllers receive the same list.")
                    .required(false),
            )
            .arg(
                Arg::new("zenoh-listen")
                    .long("zenoh-listen")
                    .value_name("ENDPOINTS")
                    .help("Endpoints to accept sessions on, comma separated (peer only)")
                    .required(false),
            )
            .arg(
                Arg::new("no-multicast")
                    .long("no-multicast")
                    .action(ArgAction::SetTrue)
                    .help("Turn off multicast scouting; pair with --zenoh-connect"),
            )
            .arg(
                Arg::new("bus-prefix")
                    .long("bus-prefix")
                    .value_name("PREFIX")
                    .env("SWARMHIVE_BUS_PREFIX")
                    .help("Zenoh key prefix the control plane lives under")
                    .required(false)
                    .default_value("swarmhive"),
            )
            .arg(
                Arg::new("scenario-dir")
                    .long("scenario-dir")
                    .value_name("DIRECTORY")
                    .action(ArgAction::Append)
                    .help("Extra directory of .json5 scenarios (repeatable)")
                    .long_help("Extra directory of .json5 scenarios. Repeatable. A scenario id found \
                              in a later directory replaces the same id from an earlier one. \
                              Searched before these: /usr/share/swarmhive/scenarios, \
                              ~/.config/swarmhive/scenarios, ./scenarios"),
            )
            .arg(
                Arg::new("no-default-scenarios")
                    .long("no-default-scenarios")
                    .action(ArgAction::SetTrue)
                    .help("Only load scenarios from --scenario-dir"),
            )
            .arg(
                Arg::new("controller-image")
                    .long("controller-image")
                    .value_name("IMAGE")
                    .help("Container image for swarm controllers")
                    .long_help("Container image started for each swarm's controller, unless the \
                              scenario names its own.")
                    .required(false)
                    .default_value("swarmhive/controller:latest"),
            )
            .arg(
                Arg::new("tick-interval-ms")
                    .long("tick-interval-ms")
                    .value_name("MILLIS")
                    .env("SWARMHIVE_TICK_INTERVAL_MS")
                    .help("Timeline tick cadence in milliseconds")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .default_value("250"),
            )
            .arg(
                Arg::new("confirmation-retention-secs")
                    .long("confirmation-retention-secs")
                    .value_name("SECONDS")
                    .help("How long confirmation de-duplication state is kept")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .default_value("600"),
            )
            .arg(
                Arg::new("swarm")
                    .short('s')
                    .long("swarm")
                    .value_name("SWARM_ID=SCENARIO_ID")
                    .action(ArgAction::Append)
                    .help("Create a swarm from a scenario at startup")
                    .long_help("Create a swarm at startup, e.g. --swarm sw1=rest-basic. \
                              Can be specified multiple times. Swarms created this way are \
                              deleted again on shutdown."),
            )
    }

    /// Split the `--swarm` requests into (swarm id, scenario id) pairs
    pub fn swarm_requests(&self) -> Result<Vec<(String, String)>> {
        self.swarms
            .iter()
            .map(|request| {
                request
                    .split_once('=')
                    .map(|(swarm, scenario)| (swarm.trim().to_string(), scenario.trim().to_string()))
                    .filter(|(swarm, scenario)| !swarm.is_empty() && !scenario.is_empty())
                    .ok_or_else(|| {
                        anyhow!("swarm request '{}' is not SWARM_ID=SCENARIO_ID", request)
                    })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name {
            return Err(anyhow!(
                "instance name '{}' must be non-empty ASCII letters, digits, '-' or '_'",
                self.name
            ));
        }
        if !matches!(self.zenoh_mode.to_lowercase().as_str(), "peer" | "client") {
            return Err(anyhow!("unknown session mode '{}'", self.zenoh_mode));
        }
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("--tick-interval-ms must be positive"));
        }

        self.swarm_requests()?;
        Ok(())
    }
}
