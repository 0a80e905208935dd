use std::sync::LazyLock;

use regex::Regex;

static NON_IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid regex"));

/// Replace every run of non-identifier characters with `_`.
pub fn sanitize(raw: &str) -> String {
    let cleaned = NON_IDENT.replace_all(raw, "_").into_owned();
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) || cleaned.is_empty() {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

/// Derives working-table names from a run-scoped salt.
///
/// A name is a function of (prefix, scope, role, salt) only, so two runs never
/// collide and the same (scope, role) pair always maps to the same table.
#[derive(Debug, Clone)]
pub struct TableNamer {
    prefix: String,
    salt: String,
}

impl TableNamer {
    pub fn new(prefix: &str, salt: &str) -> Self {
        Self { prefix: prefix.to_string(), salt: sanitize(salt).trim_start_matches('_').to_string() }
    }

    /// Draw a fresh salt for one run.
    pub fn random(prefix: &str) -> Self {
        Self::new(prefix, &format!("{:08x}", rand::random::<u32>()))
    }

    #[inline] pub fn salt(&self) -> &str { &self.salt }

    /// Namer for the `index`-th location of the run. Names of different
    /// locations never collide, whatever their ids sanitize to.
    pub fn scoped(&self, index: usize) -> Self {
        Self { prefix: format!("{}l{index}_", self.prefix), salt: self.salt.clone() }
    }

    /// Name for `role` within `scope` (a location or sub-area id).
    pub fn name(&self, scope: &str, role: &str) -> String {
        sanitize(&format!("{}{}_{}_{}", self.prefix, scope, role, self.salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic_and_scoped() {
        let namer = TableNamer::new("p_", "abc");
        assert_eq!(namer.name("A", "building"), "p_A_building_abc");
        assert_eq!(namer.name("A", "building"), namer.name("A", "building"));
        assert_ne!(namer.name("A", "building"), namer.name("A_1", "building"));
        assert_ne!(namer.name("A", "building"), TableNamer::new("p_", "abd").name("A", "building"));
    }

    #[test]
    fn location_scopes_keep_sanitized_ids_apart() {
        let namer = TableNamer::new("", "s");
        assert_eq!(sanitize("Saint-Malo"), sanitize("Saint_Malo"));
        assert_ne!(namer.scoped(0).name("Saint-Malo", "building"), namer.scoped(1).name("Saint_Malo", "building"));
        // Sub-area 1 of "A" against a location called "A_1".
        assert_ne!(namer.scoped(0).name("A_1", "building"), namer.scoped(1).name("A_1", "building"));
        assert_eq!(namer.scoped(2).name("A", "zone"), "l2_A_zone_s");
    }

    #[test]
    fn bbox_ids_become_identifiers() {
        let namer = TableNamer::new("", "s1");
        assert_eq!(namer.name("45.1_-1.2_45.3_-1.0", "zone"), "_45_1__1_2_45_3__1_0_zone_s1");
        assert_eq!(sanitize("Pont-de-Veyle"), "Pont_de_Veyle");
    }
}
