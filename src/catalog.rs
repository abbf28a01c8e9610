use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskRequirements {
    pub easy_tasks_completed: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub reward: f64,
    pub link: Option<String>,
    pub instructions: String,
    pub requirements: Option<TaskRequirements>,
}

impl TaskDefinition {
    /// Number of approved easy tasks needed before this one can be submitted.
    pub fn required_easy_tasks(&self) -> u32 {
        self.requirements
            .as_ref()
            .map(|req| req.easy_tasks_completed)
            .unwrap_or(0)
    }
}

/// Read-only list of explorable tasks.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: Vec<TaskDefinition>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDefinition>) -> TaskCatalog {
        TaskCatalog { tasks }
    }

    pub fn builtin() -> TaskCatalog {
        TaskCatalog::new(vec![
            task(
                "follow-x",
                "Follow on X",
                "Follow the project account on X.",
                Difficulty::Easy,
                5.0,
                Some("https://x.com/sonavo_web3"),
                "Follow the account and attach a screenshot of the profile page.",
                None,
            ),
            task(
                "retweet-launch",
                "Repost the launch post",
                "Share the launch announcement with your followers.",
                Difficulty::Easy,
                3.0,
                Some("https://x.com/sonavo_web3/status/1"),
                "Repost the pinned post and paste the link to your repost.",
                None,
            ),
            task(
                "join-discord",
                "Join Discord",
                "Join the community Discord server.",
                Difficulty::Easy,
                4.0,
                Some("https://discord.gg/sonavo"),
                "Join the server and send your Discord handle.",
                None,
            ),
            task(
                "write-review",
                "Write a short review",
                "Write a short review of the platform.",
                Difficulty::Medium,
                8.0,
                None,
                "Publish a review of at least 100 words and paste the link.",
                Some(2),
            ),
            task(
                "create-thread",
                "Create a thread",
                "Create an explanatory thread about the platform.",
                Difficulty::Medium,
                12.0,
                None,
                "Post a thread of five or more posts and paste the link.",
                Some(3),
            ),
            task(
                "make-video",
                "Record a video walkthrough",
                "Record a short video walking through the first tasks.",
                Difficulty::Hard,
                25.0,
                None,
                "Upload a video of at least one minute and paste the link.",
                Some(3),
            ),
        ])
    }

    pub fn list_tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn get_by_id(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Counts how many of the given task ids are easy catalog tasks.
    pub fn count_easy<'a, I>(&self, task_ids: I) -> u32
    where
        I: IntoIterator<Item = &'a String>,
    {
        task_ids
            .into_iter()
            .filter_map(|id| self.get_by_id(id))
            .filter(|task| task.difficulty == Difficulty::Easy)
            .count() as u32
    }
}

#[allow(clippy::too_many_arguments)]
fn task(
    id: &str,
    title: &str,
    description: &str,
    difficulty: Difficulty,
    reward: f64,
    link: Option<&str>,
    instructions: &str,
    easy_required: Option<u32>,
) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        difficulty,
        reward,
        link: link.map(str::to_string),
        instructions: instructions.to_string(),
        requirements: easy_required.map(|easy_tasks_completed| TaskRequirements {
            easy_tasks_completed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Difficulty, TaskCatalog};

    #[test]
    fn test_get_by_id() {
        let catalog = TaskCatalog::builtin();
        let task = catalog.get_by_id("follow-x").unwrap();
        assert_eq!(task.reward, 5.0);
        assert_eq!(task.difficulty, Difficulty::Easy);
        assert!(catalog.get_by_id("telegram").is_none());
        assert!(catalog.get_by_id("missing").is_none());
    }

    #[test]
    fn test_list_is_ordered_and_stable() {
        let catalog = TaskCatalog::builtin();
        let ids: Vec<&str> = catalog.list_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids[0], "follow-x");
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_count_easy() {
        let catalog = TaskCatalog::builtin();
        let ids = vec![
            "follow-x".to_string(),
            "write-review".to_string(),
            "join-discord".to_string(),
            "unknown".to_string(),
        ];
        assert_eq!(catalog.count_easy(&ids), 2);
        assert_eq!(catalog.get_by_id("write-review").unwrap().required_easy_tasks(), 2);
        assert_eq!(catalog.get_by_id("follow-x").unwrap().required_easy_tasks(), 0);
    }
}
