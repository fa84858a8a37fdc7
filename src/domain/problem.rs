use serde::{Deserialize, Serialize};

/// A focus area declared by the decomposer for a sub-problem: the things
/// the synthesis must explicitly address before the sub-problem can be
/// considered resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Focus {
    pub key_questions: Vec<String>,
    pub risks: Vec<String>,
    pub alternatives: Vec<String>,
    pub required_expertise: Vec<String>,
    pub success_criteria: Vec<String>,
}

/// A focused, answerable sub-question decomposed from the user's problem.
///
/// Invariant: `dependencies` reference only ids of sub-problems that
/// precede this one in decomposition order (acyclic by construction —
/// see `Problem::validate`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubProblem {
    pub id: String,
    pub goal: String,
    pub rationale: String,
    pub complexity_score: u8,
    pub dependencies: Vec<String>,
    pub focus: Option<Focus>,
}

impl SubProblem {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            rationale: rationale.into(),
            complexity_score: 5,
            dependencies: Vec::new(),
            focus: None,
        }
    }
}

/// The user's problem statement and its decomposition into sub-problems.
/// Immutable after `Decomposer` runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Problem {
    pub id: String,
    pub description: String,
    pub context: Option<String>,
    pub sub_problems: Vec<SubProblem>,
    pub complexity: Option<u8>,
}

impl Problem {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            context: None,
            sub_problems: Vec::new(),
            complexity: None,
        }
    }

    /// Validates the acyclic-dependency invariant: every dependency must
    /// name a sub-problem id that already exists and must not (directly or
    /// transitively) depend on the sub-problem naming it.
    pub fn validate(&self) -> Result<(), String> {
        let ids: std::collections::HashSet<&str> =
            self.sub_problems.iter().map(|s| s.id.as_str()).collect();

        for sp in &self.sub_problems {
            for dep in &sp.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "sub_problem {} depends on unknown sub_problem {}",
                        sp.id, dep
                    ));
                }
                if dep == &sp.id {
                    return Err(format!("sub_problem {} depends on itself", sp.id));
                }
            }
        }

        // Kahn's algorithm over the declared dependency edges detects cycles.
        let mut indegree: std::collections::HashMap<&str, usize> =
            self.sub_problems.iter().map(|s| (s.id.as_str(), 0)).collect();
        for sp in &self.sub_problems {
            for dep in &sp.dependencies {
                *indegree.get_mut(dep.as_str()).unwrap() += 0; // dep node itself
            }
        }
        let mut children: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
        for sp in &self.sub_problems {
            for dep in &sp.dependencies {
                children.entry(dep.as_str()).or_default().push(sp.id.as_str());
                *indegree.get_mut(sp.id.as_str()).unwrap() += 1;
            }
        }

        let mut queue: std::collections::VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            if let Some(kids) = children.get(node) {
                for &kid in kids {
                    let d = indegree.get_mut(kid).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(kid);
                    }
                }
            }
        }

        if visited != self.sub_problems.len() {
            return Err("sub_problem dependency graph contains a cycle".to_string());
        }

        Ok(())
    }

    /// Sub-problems whose dependencies are all present in `completed`.
    pub fn ready(&self, completed: &std::collections::HashSet<String>) -> Vec<&SubProblem> {
        self.sub_problems
            .iter()
            .filter(|sp| !completed.contains(&sp.id))
            .filter(|sp| sp.dependencies.iter().all(|d| completed.contains(d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_acyclic_dag() {
        let mut p = Problem::new("p1", "test");
        p.sub_problems.push(SubProblem::new("sp0", "g0", "r0"));
        let mut sp1 = SubProblem::new("sp1", "g1", "r1");
        sp1.dependencies = vec!["sp0".to_string()];
        p.sub_problems.push(sp1);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_cycle() {
        let mut p = Problem::new("p1", "test");
        let mut sp0 = SubProblem::new("sp0", "g0", "r0");
        sp0.dependencies = vec!["sp1".to_string()];
        let mut sp1 = SubProblem::new("sp1", "g1", "r1");
        sp1.dependencies = vec!["sp0".to_string()];
        p.sub_problems.push(sp0);
        p.sub_problems.push(sp1);
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let mut p = Problem::new("p1", "test");
        let mut sp0 = SubProblem::new("sp0", "g0", "r0");
        sp0.dependencies = vec!["ghost".to_string()];
        p.sub_problems.push(sp0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn ready_respects_dependencies() {
        let mut p = Problem::new("p1", "test");
        p.sub_problems.push(SubProblem::new("sp0", "g0", "r0"));
        let mut sp1 = SubProblem::new("sp1", "g1", "r1");
        sp1.dependencies = vec!["sp0".to_string()];
        p.sub_problems.push(sp1);
        p.sub_problems.push(SubProblem::new("sp2", "g2", "r2"));

        let completed = std::collections::HashSet::new();
        let ready: Vec<&str> = p.ready(&completed).iter().map(|s| s.id.as_str()).collect();
        assert!(ready.contains(&"sp0"));
        assert!(ready.contains(&"sp2"));
        assert!(!ready.contains(&"sp1"));

        let mut completed = std::collections::HashSet::new();
        completed.insert("sp0".to_string());
        let ready: Vec<&str> = p.ready(&completed).iter().map(|s| s.id.as_str()).collect();
        assert!(ready.contains(&"sp1"));
    }
}
