//! Typed ID definitions for scheduler and manager resources.

use crate::{define_id, IdError};

// =============================================================================
// Manager-issued IDs
// =============================================================================

define_id!(
    /// Identifier the manager assigns to a resource offer.
    OfferId,
    "offer"
);
define_id!(
    /// Identifier of an agent (a host contributing resources).
    AgentId,
    "agent"
);
define_id!(
    /// Identifier the manager assigns to this framework on subscription.
    FrameworkId,
    "framework"
);

// =============================================================================
// Scheduler-issued IDs
// =============================================================================

define_id!(
    /// Identifier of an application, `{app_name}.{run_as}.{cluster}`.
    AppId,
    "app"
);
define_id!(
    /// Identifier of a single task instance, `{index}.{app_id}`.
    TaskId,
    "task"
);

impl AppId {
    /// Longest app ID `compose` accepts: room is left for the largest
    /// `{index}.` prefix a task ID can add.
    pub const MAX_COMPOSED_LEN: usize = crate::MAX_ID_LEN - TaskId::MAX_INDEX_PREFIX;

    /// Builds an app ID from its components.
    ///
    /// `name` and `run_as` must not contain dots, otherwise the ID could not
    /// be split back into its parts.
    pub fn compose(name: &str, run_as: &str, cluster: &str) -> Result<Self, IdError> {
        for (part, value) in [("app name", name), ("run-as", run_as)] {
            crate::validate(Self::KIND, value)?;
            if value.contains('.') {
                return Err(IdError::InvalidFormat {
                    kind: Self::KIND,
                    message: format!("{part} '{value}' must not contain '.'"),
                });
            }
        }
        crate::validate(Self::KIND, cluster)?;

        let id = format!("{name}.{run_as}.{cluster}");
        if id.len() > Self::MAX_COMPOSED_LEN {
            return Err(IdError::TooLong {
                kind: Self::KIND,
                max: Self::MAX_COMPOSED_LEN,
                actual: id.len(),
            });
        }
        Self::parse(&id)
    }

    /// Returns the application name component.
    pub fn app_name(&self) -> &str {
        self.as_str().split('.').next().unwrap_or_default()
    }
}

impl TaskId {
    /// Length of `"4294967295."`, the longest index prefix.
    const MAX_INDEX_PREFIX: usize = 11;

    /// Builds the task ID for instance `index` of `app`.
    ///
    /// Fails only for an `app` longer than [`AppId::MAX_COMPOSED_LEN`], which
    /// `AppId::compose` never returns.
    pub fn for_instance(index: u32, app: &AppId) -> Result<Self, IdError> {
        Self::parse(&format!("{index}.{app}"))
    }

    /// Returns the instance index if this ID follows the `{index}.{app_id}` scheme.
    pub fn instance_index(&self) -> Option<u32> {
        let (index, _) = self.as_str().split_once('.')?;
        index.parse().ok()
    }

    /// Returns the owning app ID if this ID follows the `{index}.{app_id}` scheme.
    pub fn app_id(&self) -> Option<AppId> {
        let (index, app) = self.as_str().split_once('.')?;
        index.parse::<u32>().ok()?;
        AppId::parse(app).ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_id_roundtrip() {
        let id: OfferId = "5a3c-O42".parse().unwrap();
        assert_eq!(id.as_str(), "5a3c-O42");
        assert_eq!(id.to_string(), "5a3c-O42");
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = AgentId::parse("").unwrap_err();
        assert!(err.is_empty());
        assert_eq!(err.kind(), "agent");
    }

    #[test]
    fn test_whitespace_rejected() {
        let err = FrameworkId::parse("fw 1").unwrap_err();
        assert!(matches!(err, IdError::InvalidCharacter { ch: ' ', .. }));
    }

    #[test]
    fn test_too_long_rejected() {
        let long = "x".repeat(crate::MAX_ID_LEN + 1);
        assert!(matches!(
            OfferId::parse(&long),
            Err(IdError::TooLong { .. })
        ));
    }

    #[test]
    fn test_app_id_compose() {
        let id = AppId::compose("web", "ops", "prod-east").unwrap();
        assert_eq!(id.as_str(), "web.ops.prod-east");
        assert_eq!(id.app_name(), "web");
    }

    #[test]
    fn test_app_id_compose_rejects_dotted_name() {
        let err = AppId::compose("web.v2", "ops", "prod").unwrap_err();
        assert!(matches!(err, IdError::InvalidFormat { .. }));
    }

    #[test]
    fn test_task_id_for_instance() {
        let app = AppId::compose("web", "ops", "prod").unwrap();
        let task = TaskId::for_instance(3, &app).unwrap();
        assert_eq!(task.as_str(), "3.web.ops.prod");
        assert_eq!(task.instance_index(), Some(3));
        assert_eq!(task.app_id(), Some(app));
    }

    #[test]
    fn test_longest_composed_app_id_fits_any_index() {
        let cluster = "c".repeat(AppId::MAX_COMPOSED_LEN - "web.ops.".len());
        let app = AppId::compose("web", "ops", &cluster).unwrap();
        assert_eq!(app.as_str().len(), AppId::MAX_COMPOSED_LEN);

        let task = TaskId::for_instance(u32::MAX, &app).unwrap();
        assert_eq!(task.as_str().len(), crate::MAX_ID_LEN);
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(serde_json::from_str::<TaskId>(&json).unwrap(), task);

        let err = AppId::compose("web", "ops", &format!("{cluster}c")).unwrap_err();
        assert!(matches!(err, IdError::TooLong { max, .. } if max == AppId::MAX_COMPOSED_LEN));
    }

    #[test]
    fn test_oversized_app_id_has_no_task_id() {
        let app = AppId::parse(&"a".repeat(crate::MAX_ID_LEN)).unwrap();
        assert!(matches!(
            TaskId::for_instance(0, &app),
            Err(IdError::TooLong { .. })
        ));
    }

    #[test]
    fn test_foreign_task_id_has_no_index() {
        let task = TaskId::parse("nginx-7f9c").unwrap();
        assert_eq!(task.instance_index(), None);
        assert_eq!(task.app_id(), None);
    }

    #[test]
    fn test_json_rejects_invalid_id() {
        let result: Result<TaskId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());

        let id: TaskId = serde_json::from_str("\"0.web.ops.prod\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0.web.ops.prod\"");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn printable_ids_roundtrip(s in "[A-Za-z0-9._:-]{1,64}") {
                let id = OfferId::parse(&s).unwrap();
                prop_assert_eq!(id.to_string(), s);
            }

            #[test]
            fn task_ids_recover_their_index(index in 0u32..10_000, name in "[a-z][a-z0-9-]{0,15}") {
                let app = AppId::compose(&name, "root", "local").unwrap();
                let task = TaskId::for_instance(index, &app).unwrap();
                prop_assert_eq!(task.instance_index(), Some(index));
                prop_assert_eq!(task.app_id(), Some(app));
            }
        }
    }
}
