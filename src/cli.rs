use crate::{
    config::{BACKEND_KEY, GraphConfig, SQLITE_PATH_KEY},
    errors::GraphError,
    index_spec::IndexSpec,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLineConfig {
    pub backend: String,
    pub database: String,
    pub command: String,
    pub command_args: Vec<String>,
}

impl CommandLineConfig {
    pub fn from_args(args: &[&str]) -> Result<Self, String> {
        let mut backend = String::from("embedded");
        let mut database = String::from("memory");
        let mut command = String::from("capabilities");
        let mut command_args = Vec::new();
        let mut command_set = false;
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            if command_set {
                command_args.push(arg.to_string());
                continue;
            }
            match *arg {
                "--backend" => {
                    backend = iter
                        .next()
                        .ok_or_else(|| "--backend requires a value".to_string())?
                        .to_string();
                }
                "--db" | "--database" => {
                    database = iter
                        .next()
                        .ok_or_else(|| "--db requires a value".to_string())?
                        .to_string();
                }
                "--command" => {
                    command = iter
                        .next()
                        .ok_or_else(|| "--command requires a value".to_string())?
                        .to_string();
                    command_set = true;
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown flag {other}"));
                }
                _ => {
                    command = arg.to_string();
                    command_set = true;
                }
            }
        }
        Ok(Self {
            backend,
            database,
            command,
            command_args,
        })
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig::from_pairs([
            (BACKEND_KEY, self.backend.as_str()),
            (SQLITE_PATH_KEY, self.database.as_str()),
        ])
    }

    /// Index specs passed after the `ensure` command.
    pub fn index_specs(&self) -> Result<Vec<IndexSpec>, GraphError> {
        self.command_args.iter().map(|arg| arg.parse()).collect()
    }

    pub fn help() -> &'static str {
        "Usage: graphbridge [--backend embedded|sqlite] [--db memory|PATH] \
[--command capabilities|schema|ensure] [SPEC...]
  SPEC: kind:prop=type[,prop=type...][!unique], e.g. node:name=string,type=string
"
    }
}
