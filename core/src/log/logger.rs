use ::log::LevelFilter;
use log4rs::config::Logger;
use std::{collections::HashMap, env};

pub(super) struct Loggers {
    loggers: Vec<(String, LevelFilter)>,
    root_level: LevelFilter,
}

impl Loggers {
    pub fn root_level(&self) -> LevelFilter {
        self.root_level
    }

    pub fn items(&self) -> impl Iterator<Item = Logger> + '_ {
        self.loggers.iter().map(|(name, level)| Logger::builder().build(name.clone(), *level))
    }
}

/// Collects per-target levels out of filter expressions such as
/// `info,nodesvc_grpc_server=debug,h2=warn`.
pub(super) struct Builder {
    loggers: HashMap<String, LevelFilter>,
    root_level: Option<LevelFilter>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder { loggers: HashMap::new(), root_level: None }
    }

    pub fn root_level(&mut self, root_level: LevelFilter) -> &mut Self {
        self.root_level.replace(root_level);
        self
    }

    pub fn parse_env(&mut self, env: &str) -> &mut Self {
        self.parse_expression(&env::var(env).unwrap_or_default())
    }

    pub fn parse_expression(&mut self, expression: &str) -> &mut Self {
        for spec in expression.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
            let mut parts = spec.split('=').map(|x| x.trim());
            match (parts.next(), parts.next(), parts.next()) {
                (Some(single), None, None) => match single.parse::<LevelFilter>() {
                    // A bare level sets the root
                    Ok(level) => {
                        self.root_level.replace(level);
                    }
                    Err(_) => {
                        self.loggers.insert(single.to_string(), LevelFilter::max());
                    }
                },
                (Some(name), Some(""), None) => {
                    self.loggers.insert(name.to_string(), LevelFilter::max());
                }
                (Some(name), Some(level), None) => match level.parse::<LevelFilter>() {
                    Ok(level) => {
                        self.loggers.insert(name.to_string(), level);
                    }
                    Err(_) => println!("Ignoring invalid logging spec '{}'", spec),
                },
                _ => println!("Ignoring invalid logging spec '{}'", spec),
            }
        }
        self
    }

    pub fn build(&mut self) -> Loggers {
        let mut loggers = self.loggers.drain().collect::<Vec<_>>();
        loggers.sort();
        Loggers { loggers, root_level: self.root_level.take().unwrap_or(LevelFilter::Info) }
    }
}
