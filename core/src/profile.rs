use std::sync::Arc;

use serde_json::Value;

use crate::clock::Clock;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{NewProfile, ProfileUpdate, UserGoals, UserProfile};
use crate::session::UserSession;
use crate::store::{RemoteStore, Subscription};

const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Profile, goals and onboarding for one user.
pub struct ProfileService {
    session: UserSession,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileService {
    #[must_use]
    pub fn new(session: UserSession, store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session,
            store,
            clock,
        }
    }

    async fn read_root(&self) -> TrackerResult<(String, Value)> {
        let root = self.session.root_path();
        let value = self.store.get(&root).await?;
        Ok((root, value))
    }

    pub async fn load_profile(&self) -> TrackerResult<Option<UserProfile>> {
        let (root, value) = self.read_root().await?;
        UserProfile::from_value(&root, &value)
    }

    /// Onboard the user. A profile that was already created is returned as
    /// is; otherwise the profile fields are written next to any step or
    /// water data the user already has.
    pub async fn create_profile(&self, profile: &NewProfile) -> TrackerResult<UserProfile> {
        profile.validate()?;
        let (root, value) = self.read_root().await?;
        if let Some(existing) = UserProfile::from_value(&root, &value)? {
            if existing.created_at.is_some() {
                tracing::info!(uid = self.session.uid(), "profile already exists");
                return Ok(existing);
            }
        }

        let created_at = self.clock.now().format(CREATED_AT_FORMAT).to_string();
        let Value::Object(mut fields) = profile.to_value(&created_at) else {
            return Err(TrackerError::InvalidInput(
                "profile did not serialise to an object".to_string(),
            ));
        };
        // Points earned before onboarding finished are kept.
        if let Some(map) = value.as_object() {
            for key in ["total_points", "current_level"] {
                if map.get(key).is_some_and(|v| !v.is_null()) {
                    fields.remove(key);
                }
            }
        }
        self.store.update(&root, fields).await?;
        tracing::info!(uid = self.session.uid(), "profile created");

        self.load_profile()
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("profile for '{}'", self.session.uid())))
    }

    /// Write only the fields set in `update`.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> TrackerResult<UserProfile> {
        if update.is_empty() {
            return Err(TrackerError::InvalidInput(
                "Nothing to update. Specify at least one field".to_string(),
            ));
        }
        let fields = update.to_fields()?;
        if self.load_profile().await?.is_none() {
            return Err(TrackerError::NotFound(format!(
                "No profile for user '{}'. Run 'stride init' first",
                self.session.uid()
            )));
        }
        self.store.update(&self.session.root_path(), fields).await?;
        tracing::info!(uid = self.session.uid(), "profile updated");
        self.load_profile()
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("profile for '{}'", self.session.uid())))
    }

    pub async fn goals(&self) -> TrackerResult<UserGoals> {
        let (root, value) = self.read_root().await?;
        UserGoals::from_value(&root, &value)
    }

    pub async fn set_goals(
        &self,
        daily_step_goal: Option<u32>,
        daily_water_goal_ml: Option<u32>,
    ) -> TrackerResult<UserGoals> {
        let update = ProfileUpdate {
            daily_step_goal,
            daily_water_goal_ml,
            ..ProfileUpdate::default()
        };
        Ok(self.update_profile(&update).await?.goals)
    }

    /// Follow the user's goals; a value is yielded first and then whenever
    /// a goal changes.
    pub fn watch_goals(&self) -> TrackerResult<GoalsWatch> {
        let sub = self.store.subscribe(&self.session.root_path())?;
        Ok(GoalsWatch { sub, last: None })
    }
}

/// Live goals. Dropping it releases the listener.
pub struct GoalsWatch {
    sub: Subscription,
    last: Option<UserGoals>,
}

impl GoalsWatch {
    pub async fn next(&mut self) -> Option<UserGoals> {
        loop {
            let value = self.sub.next().await?;
            let goals = match UserGoals::from_value(self.sub.path(), &value) {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable profile snapshot");
                    continue;
                }
            };
            if self.last != Some(goals) {
                self.last = Some(goals);
                return Some(goals);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::models::parse_date;
    use serde_json::json;

    fn service(store: &MemoryStore) -> ProfileService {
        ProfileService::new(
            UserSession::new("u1").unwrap(),
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(
                parse_date("2024-06-15").unwrap().and_hms_opt(8, 0, 0).unwrap(),
            )),
        )
    }

    fn sam() -> NewProfile {
        NewProfile {
            full_name: "Sam".to_string(),
            age: 30,
            height_cm: 175.0,
            weight_kg: 70.0,
        }
    }

    #[tokio::test]
    async fn test_create_profile_writes_defaults() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        let profile = profiles.create_profile(&sam()).await.unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Sam"));
        assert_eq!(profile.total_points, 0);
        assert_eq!(profile.current_level, 1);
        assert_eq!(profile.goals, UserGoals::default());
        assert_eq!(profile.created_at.as_deref(), Some("2024-06-15T08:00:00"));
    }

    #[tokio::test]
    async fn test_create_profile_keeps_existing_data() {
        let store = MemoryStore::new();
        store
            .set(
                "users/u1",
                json!({ "total_points": 7, "steps": { "2024-06-15": { "steps": 100 } } }),
            )
            .await
            .unwrap();
        let profiles = service(&store);
        let profile = profiles.create_profile(&sam()).await.unwrap();
        assert_eq!(profile.total_points, 7);
        let steps = store.get("users/u1/steps/2024-06-15/steps").await.unwrap();
        assert_eq!(steps, json!(100));
    }

    #[tokio::test]
    async fn test_create_profile_twice_returns_first() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        profiles.create_profile(&sam()).await.unwrap();
        let mut other = sam();
        other.full_name = "Alex".to_string();
        let again = profiles.create_profile(&other).await.unwrap();
        assert_eq!(again.full_name.as_deref(), Some("Sam"));
    }

    #[tokio::test]
    async fn test_update_profile_is_narrow() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        profiles.create_profile(&sam()).await.unwrap();
        let updated = profiles
            .update_profile(&ProfileUpdate {
                weight_kg: Some(68.0),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.weight_kg, Some(68.0));
        assert_eq!(updated.full_name.as_deref(), Some("Sam"));
        assert_eq!(updated.age, Some(30));
    }

    #[tokio::test]
    async fn test_update_requires_profile_and_fields() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        assert!(matches!(
            profiles.update_profile(&ProfileUpdate::default()).await,
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(matches!(
            profiles.set_goals(Some(9000), None).await,
            Err(TrackerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_goals_and_watch() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        profiles.create_profile(&sam()).await.unwrap();

        let mut watch = profiles.watch_goals().unwrap();
        assert_eq!(watch.next().await.unwrap(), UserGoals::default());

        let goals = profiles.set_goals(Some(10_000), None).await.unwrap();
        assert_eq!(goals.daily_step_goal, 10_000);
        assert_eq!(goals.daily_water_goal_ml, 2000);
        assert_eq!(watch.next().await.unwrap().daily_step_goal, 10_000);
        assert_eq!(profiles.goals().await.unwrap(), goals);
    }

    #[tokio::test]
    async fn test_goals_default_without_profile() {
        let store = MemoryStore::new();
        let profiles = service(&store);
        assert_eq!(profiles.goals().await.unwrap(), UserGoals::default());
        assert!(profiles.load_profile().await.unwrap().is_none());
    }
}
