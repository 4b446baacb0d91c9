use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// A service implementation callable by name.
///
/// Concrete services implement dispatch explicitly: match on the method
/// name, check the argument shapes, run the implementation. An `Err` is a
/// dispatch failure (unknown method, wrong arguments, implementation
/// error) and travels back to the caller inside the response, never as a
/// transport failure.
pub trait RpcService: Send + Sync {
    fn invoke(
        &self,
        method: &str,
        arg_types: &[String],
        args: &[Value],
    ) -> std::result::Result<Value, String>;
}

/// Process-local registration table: service name to implementation.
#[derive(Default)]
pub struct ServiceTable {
    services: RwLock<HashMap<String, Arc<dyn RpcService>>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under a service name, replacing any
    /// previous registration of the same name.
    pub fn register(&self, name: impl Into<String>, service: Arc<dyn RpcService>) {
        let mut services = self.services.write().expect("service table lock poisoned");
        services.insert(name.into(), service);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RpcService>> {
        let services = self.services.read().expect("service table lock poisoned");
        services.get(name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        let services = self.services.read().expect("service table lock poisoned");
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;
    impl RpcService for Echo {
        fn invoke(
            &self,
            method: &str,
            _arg_types: &[String],
            _args: &[Value],
        ) -> std::result::Result<Value, String> {
            Ok(json!(method))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let table = ServiceTable::new();
        assert!(table.lookup("echo").is_none());

        table.register("echo", Arc::new(Echo));
        let service = table.lookup("echo").unwrap();
        assert_eq!(service.invoke("m", &[], &[]).unwrap(), json!("m"));
    }

    #[test]
    fn test_service_names_sorted() {
        let table = ServiceTable::new();
        table.register("b", Arc::new(Echo));
        table.register("a", Arc::new(Echo));
        assert_eq!(table.service_names(), vec!["a", "b"]);
    }
}
