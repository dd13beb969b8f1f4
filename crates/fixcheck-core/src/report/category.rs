use crate::model::InstanceOutcome;
use std::fmt::Write;

pub const CATEGORIES: [&str; 4] = ["Query", "Management", "Personalization", "Efficiency"];
const DEFAULT_CATEGORY: &str = "Personalization";

/// Unknown or absent categories are filed under `Personalization`.
pub fn normalize(category: Option<&str>) -> &'static str {
    category
        .and_then(|c| CATEGORIES.iter().find(|k| **k == c).copied())
        .unwrap_or(DEFAULT_CATEGORY)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CategoryTally {
    pub count: usize,
    pub success: usize,
}

impl CategoryTally {
    pub fn ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success as f64 / self.count as f64 * 100.0
        }
    }
}

/// Per-category tallies in display order, with the total last.
pub fn tally(outcomes: &[InstanceOutcome]) -> Vec<(&'static str, CategoryTally)> {
    let mut rows: Vec<(&'static str, CategoryTally)> = CATEGORIES
        .iter()
        .map(|c| (*c, CategoryTally::default()))
        .collect();
    let mut total = CategoryTally::default();

    for o in outcomes {
        let cat = normalize(o.category.as_deref());
        let passed = o.passed();
        if let Some((_, t)) = rows.iter_mut().find(|(c, _)| *c == cat) {
            t.count += 1;
            t.success += usize::from(passed);
        }
        total.count += 1;
        total.success += usize::from(passed);
    }
    rows.push(("Total", total));
    rows
}

pub fn render_table(outcomes: &[InstanceOutcome], metric: &str) -> String {
    let rows = tally(outcomes);
    let mut out = String::new();

    let _ = write!(out, "{:20}", "");
    for (name, _) in &rows {
        let _ = write!(out, " {:20}", name);
    }
    out.push('\n');

    let _ = write!(out, "{:20}", "count");
    for (_, t) in &rows {
        let _ = write!(out, " {:<20}", t.count);
    }
    out.push('\n');

    let bar = "=".repeat(47);
    let _ = writeln!(out, "{bar}    {metric}    {bar}");

    let _ = write!(out, "{:20}", "");
    for (_, t) in &rows {
        let _ = write!(out, " {:<20.2}", t.ratio());
    }
    out.push('\n');
    out.push_str(&"=".repeat(112));
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceRecord;
    use serde_json::json;

    fn outcome(category: Option<&str>, pass: bool) -> InstanceOutcome {
        let r = InstanceRecord::from_value(0, json!({"instance_id": "x", "category": category}))
            .unwrap();
        let mut o = InstanceOutcome::new(&r);
        o.assertion_error = !pass;
        o
    }

    #[test]
    fn unknown_categories_fall_back_to_personalization() {
        assert_eq!(normalize(Some("Query")), "Query");
        assert_eq!(normalize(Some("query")), "Personalization");
        assert_eq!(normalize(None), "Personalization");
    }

    #[test]
    fn tallies_count_successes_per_category() {
        let outs = vec![
            outcome(Some("Query"), true),
            outcome(Some("Query"), false),
            outcome(Some("Efficiency"), true),
            outcome(None, false),
        ];
        let t = tally(&outs);
        assert_eq!(t[0], ("Query", CategoryTally { count: 2, success: 1 }));
        assert_eq!(t[2].1.count, 1);
        assert_eq!(t[3].1.ratio(), 100.0);
        assert_eq!(t[4], ("Total", CategoryTally { count: 4, success: 2 }));

        let table = render_table(&outs, "Test Case");
        assert!(table.contains("    Test Case    "));
        assert!(table.lines().nth(1).unwrap_or("").starts_with("count"));
        assert!(table.contains("50.00"));
    }
}
