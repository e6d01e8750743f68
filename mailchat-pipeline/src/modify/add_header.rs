use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mailchat_common::Envelope;
use mailchat_module::{ConfigError, ConfigMap, Instance, Modifier, Module, ModuleError};

/// `modify.add_header`: prepends `header <name> <value...>` fields, in
/// declaration order, to every message. Inline arguments are read as one
/// more `header` line.
pub struct AddHeader {
    instance: Instance,
    headers: OnceLock<Vec<(String, String)>>,
}

impl AddHeader {
    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self {
            instance,
            headers: OnceLock::new(),
        }))
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

#[async_trait]
impl Module for AddHeader {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let mut lines: Vec<Vec<String>> = cfg
            .nodes("header")
            .into_iter()
            .map(|node| node.args.clone())
            .collect();
        if !self.instance.args.is_empty() {
            lines.insert(0, self.instance.args.clone());
        }

        let mut headers = Vec::with_capacity(lines.len());
        for line in lines {
            let [name, value @ ..] = line.as_slice() else {
                continue;
            };
            if !valid_name(name) || value.is_empty() {
                return Err(ConfigError::invalid(
                    cfg.location(),
                    format!("header {name}: expected a field name and a value"),
                ));
            }
            headers.push((name.clone(), value.join(" ")));
        }

        if headers.is_empty() {
            return Err(ConfigError::MissingDirective {
                location: cfg.location(),
                name: "header".to_string(),
            });
        }

        let _ = self.headers.set(headers);
        Ok(())
    }

    fn as_modifier(self: Arc<Self>) -> Option<Arc<dyn Modifier>> {
        Some(self)
    }
}

#[async_trait]
impl Modifier for AddHeader {
    async fn rewrite_body(&self, envelope: &mut Envelope) -> Result<(), ModuleError> {
        for (name, value) in self.headers.get().into_iter().flatten().rev() {
            envelope.prepend_header(name, value);
        }
        Ok(())
    }
}
