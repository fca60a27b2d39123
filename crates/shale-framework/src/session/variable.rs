//! Declared session variables.
//!
//! Variables are declared up front in a declaration set; each session gets
//! a variable set instantiated from the declarations. Assignments enforce
//! the declared type; a variable may be unset to re-enter the poisoned
//! "declared but unset" state.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Declared type of a session variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    Boolean,
    SignedInteger,
    UnsignedInteger,
    String,
}

/// Value of a session variable: unset, or a scalar of the declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    /// Declared but carrying no value.
    Unset,
    Boolean(bool),
    SignedInteger(i64),
    UnsignedInteger(u64),
    String(String),
}

impl VariableValue {
    /// Whether this value conforms to the declared type. `Unset` conforms
    /// to every declaration.
    pub fn conforms_to(&self, declared: VariableType) -> bool {
        matches!(
            (self, declared),
            (VariableValue::Unset, _)
                | (VariableValue::Boolean(_), VariableType::Boolean)
                | (VariableValue::SignedInteger(_), VariableType::SignedInteger)
                | (VariableValue::UnsignedInteger(_), VariableType::UnsignedInteger)
                | (VariableValue::String(_), VariableType::String)
        )
    }
}

/// One variable declaration: name, type, and initial value.
#[derive(Debug, Clone)]
pub struct SessionVariableDeclaration {
    name: String,
    variable_type: VariableType,
    initial_value: VariableValue,
}

impl SessionVariableDeclaration {
    pub fn new(
        name: impl Into<String>,
        variable_type: VariableType,
        initial_value: VariableValue,
    ) -> Self {
        let declaration = SessionVariableDeclaration {
            name: name.into(),
            variable_type,
            initial_value,
        };
        assert!(
            declaration.initial_value.conforms_to(declaration.variable_type),
            "initial value must conform to the declared type"
        );
        declaration
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variable_type(&self) -> VariableType {
        self.variable_type
    }

    pub fn initial_value(&self) -> &VariableValue {
        &self.initial_value
    }
}

/// The set of variable declarations registered up front.
#[derive(Debug, Default)]
pub struct SessionVariableDeclarationSet {
    declarations: RwLock<Vec<SessionVariableDeclaration>>,
}

impl SessionVariableDeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration. Returns false when the name is taken.
    pub fn declare(&self, declaration: SessionVariableDeclaration) -> bool {
        let mut declarations = self.declarations.write();
        if declarations.iter().any(|d| d.name == declaration.name) {
            return false;
        }
        declarations.push(declaration);
        true
    }

    /// Find a declaration by name.
    pub fn find(&self, name: &str) -> Option<SessionVariableDeclaration> {
        self.declarations
            .read()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Names of every declared variable.
    pub fn names(&self) -> Vec<String> {
        self.declarations
            .read()
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    /// Build a per-session variable set from the declarations.
    pub fn instantiate(&self) -> SessionVariableSet {
        let variables = self
            .declarations
            .read()
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    (d.variable_type, d.initial_value.clone()),
                )
            })
            .collect();
        SessionVariableSet {
            variables: RwLock::new(variables),
        }
    }
}

/// Per-session variable values, typed by their declarations.
#[derive(Debug, Default)]
pub struct SessionVariableSet {
    variables: RwLock<FxHashMap<String, (VariableType, VariableValue)>>,
}

impl SessionVariableSet {
    /// An empty set with no declarations; every `set` fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Declared type of a variable, when declared.
    pub fn type_of(&self, name: &str) -> Option<VariableType> {
        self.variables.read().get(name).map(|(ty, _)| *ty)
    }

    /// Current value of a variable. None when the name is not declared.
    pub fn get(&self, name: &str) -> Option<VariableValue> {
        self.variables
            .read()
            .get(name)
            .map(|(_, value)| value.clone())
    }

    /// Assign a value.
    ///
    /// Fails when the name is not declared or the value does not conform
    /// to the declared type. Assigning `Unset` always conforms.
    pub fn set(&self, name: &str, value: VariableValue) -> bool {
        let mut variables = self.variables.write();
        let Some((declared, slot)) = variables.get_mut(name) else {
            return false;
        };
        if !value.conforms_to(*declared) {
            return false;
        }
        *slot = value;
        true
    }

    /// Names of every declared variable.
    pub fn names(&self) -> Vec<String> {
        self.variables.read().keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn declarations() -> SessionVariableDeclarationSet {
        let set = SessionVariableDeclarationSet::new();
        set.declare(SessionVariableDeclaration::new(
            "trace",
            VariableType::Boolean,
            VariableValue::Unset,
        ));
        set.declare(SessionVariableDeclaration::new(
            "limit",
            VariableType::UnsignedInteger,
            VariableValue::UnsignedInteger(100),
        ));
        set.declare(SessionVariableDeclaration::new(
            "note",
            VariableType::String,
            VariableValue::Unset,
        ));
        set
    }

    #[test]
    fn test_duplicate_declaration_refused() {
        let set = declarations();
        assert!(!set.declare(SessionVariableDeclaration::new(
            "trace",
            VariableType::String,
            VariableValue::Unset,
        )));
        assert_eq!(set.find("trace").unwrap().variable_type(), VariableType::Boolean);
    }

    #[test]
    fn test_instantiate_carries_initial_values() {
        let vars = declarations().instantiate();
        assert_eq!(vars.get("trace"), Some(VariableValue::Unset));
        assert_eq!(vars.get("limit"), Some(VariableValue::UnsignedInteger(100)));
        assert_eq!(vars.get("missing"), None);
    }

    #[test]
    fn test_set_enforces_declared_type() {
        let vars = declarations().instantiate();
        assert!(vars.set("trace", VariableValue::Boolean(true)));
        assert_eq!(vars.get("trace"), Some(VariableValue::Boolean(true)));
        // wrong type refused, value untouched
        assert!(!vars.set("trace", VariableValue::String("on".into())));
        assert_eq!(vars.get("trace"), Some(VariableValue::Boolean(true)));
        // undeclared name refused
        assert!(!vars.set("unknown", VariableValue::Boolean(true)));
    }

    #[test]
    fn test_unset_reenters_poisoned_state() {
        let vars = declarations().instantiate();
        assert!(vars.set("limit", VariableValue::UnsignedInteger(5)));
        assert!(vars.set("limit", VariableValue::Unset));
        assert_eq!(vars.get("limit"), Some(VariableValue::Unset));
        assert_eq!(vars.type_of("limit"), Some(VariableType::UnsignedInteger));
    }
}
