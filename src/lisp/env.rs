use std::collections::HashMap;
use std::sync::Arc;

use super::Value;

/// Lexical environment: an immutable chain of frames.
///
/// `let`, `fn` application and destructuring push a child frame; closures
/// capture the chain by cheap clone. Top-level `def` bindings live outside
/// the chain, in the interpreter's outgoing memory.
#[derive(Debug, Clone, Default)]
pub struct Env {
    frame: Option<Arc<Frame>>,
}

#[derive(Debug)]
struct Frame {
    bindings: HashMap<String, Value>,
    parent: Env,
}

impl Env {
    pub fn root() -> Self {
        Env { frame: None }
    }

    pub fn child(&self, bindings: HashMap<String, Value>) -> Env {
        Env {
            frame: Some(Arc::new(Frame {
                bindings,
                parent: self.clone(),
            })),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = self;
        while let Some(frame) = &current.frame {
            if let Some(value) = frame.bindings.get(name) {
                return Some(value.clone());
            }
            current = &frame.parent;
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_shadows_parent() {
        let root = Env::root();
        let outer = root.child(HashMap::from([("x".to_string(), Value::Int(1))]));
        let inner = outer.child(HashMap::from([("x".to_string(), Value::Int(2))]));

        assert_eq!(outer.get("x"), Some(Value::Int(1)));
        assert_eq!(inner.get("x"), Some(Value::Int(2)));
        assert_eq!(inner.get("y"), None);
    }
}
