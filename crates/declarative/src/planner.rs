//! Planner - diffs declarations against the last snapshot
//!
//! A plan lists one step per declaration in apply order, followed by the
//! destroys of counted-out and orphaned resources, consumers first.
//! Planning never calls a provider and never writes state.

use crate::context::ProviderRegistry;
use crate::diff::{AttributeChange, classify, compute_changes};
use crate::error::{GraphError, Result, ValidationError};
use crate::expr::{EvaluatedAttributes, Lookup, Scope};
use crate::resolver;
use crate::state::Snapshot;
use crate::store::{DeclarationStore, Inactive};
use crate::types::{Action, ActionSummary, Address};
use std::collections::{BTreeMap, BTreeSet};

/// One planned operation
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub address: Address,
    pub action: Action,
    pub changes: Vec<AttributeChange>,
    /// Steps of this plan that must finish first
    pub dependencies: Vec<Address>,
    /// Why a destroy or replace is needed
    pub reason: Option<String>,
}

impl PlanStep {
    fn destroy(address: Address, reason: impl Into<String>) -> Self {
        Self {
            address,
            action: Action::Destroy,
            changes: Vec::new(),
            dependencies: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// An ordered list of steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    /// Declarations counted out with nothing provisioned
    pub skipped: Vec<(Address, Inactive)>,
}

impl Plan {
    pub fn summary(&self) -> ActionSummary {
        let mut summary = ActionSummary::default();
        for step in &self.steps {
            summary.add(step.action);
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_change())
    }

    /// Steps that change something
    pub fn changes(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.action.is_change())
    }

    pub fn step(&self, address: &Address) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.address == address)
    }

    /// Changing steps grouped into waves of mutually independent steps
    ///
    /// Converging steps come first, destroys after them. Levels are taken
    /// over every step, so a change still waits on a producer reached
    /// through an unchanged resource.
    pub fn waves(&self) -> Vec<Vec<&PlanStep>> {
        let (destroys, converge): (Vec<&PlanStep>, Vec<&PlanStep>) = self
            .steps
            .iter()
            .partition(|s| s.action == Action::Destroy);

        let mut waves = Vec::new();
        for group in [converge, destroys] {
            let by_address: BTreeMap<&Address, &PlanStep> =
                group.iter().map(|s| (&s.address, *s)).collect();
            let order: Vec<Address> = group.iter().map(|s| s.address.clone()).collect();
            let levels = resolver::levels(&order, |a| {
                by_address
                    .get(a)
                    .map(|s| s.dependencies.clone())
                    .unwrap_or_default()
            });
            for level in levels {
                let wave: Vec<&PlanStep> = level
                    .iter()
                    .filter_map(|a| by_address.get(a).copied())
                    .filter(|s| s.action.is_change())
                    .collect();
                if !wave.is_empty() {
                    waves.push(wave);
                }
            }
        }
        waves
    }
}

/// Planned action and desired inputs of a resource planned so far
struct Pending {
    action: Action,
    desired: EvaluatedAttributes,
    changed: BTreeSet<String>,
}

/// Scope used while planning
///
/// Producers being created or replaced expose only their known inputs;
/// everything else they have is unknown until apply.
struct PlanScope<'a> {
    store: &'a DeclarationStore,
    snapshot: &'a Snapshot,
    registry: &'a ProviderRegistry,
    pending: &'a BTreeMap<Address, Pending>,
}

impl Scope for PlanScope<'_> {
    fn setting(&self, name: &str) -> Lookup {
        self.store.settings().setting(name)
    }

    fn attribute(&self, address: &Address, attribute: &str) -> Lookup {
        let secret = is_secret(self.store, self.registry, address, attribute);
        let Some(pending) = self.pending.get(address) else {
            return Lookup::Missing;
        };

        let from_desired = || match pending.desired.get(attribute) {
            Some(evaluated) => match &evaluated.value {
                Some(value) => Lookup::Known {
                    value: value.clone(),
                    sensitive: evaluated.sensitive || secret,
                },
                None => Lookup::Unknown {
                    sensitive: evaluated.sensitive || secret,
                },
            },
            None => Lookup::Unknown { sensitive: secret },
        };

        match pending.action {
            Action::Create | Action::Replace => from_desired(),
            Action::Update if pending.changed.contains(attribute) => from_desired(),
            _ => match self.snapshot.lookup(address, attribute) {
                Some((value, sensitive)) => Lookup::Known {
                    value,
                    sensitive: sensitive || secret,
                },
                None => Lookup::Missing,
            },
        }
    }
}

/// Whether a producer's attribute is secret by declaration or schema
pub(crate) fn is_secret(
    store: &DeclarationStore,
    registry: &ProviderRegistry,
    address: &Address,
    attribute: &str,
) -> bool {
    store.is_sensitive(address, attribute)
        || registry
            .get(&address.resource_type)
            .is_ok_and(|p| p.schema().sensitive_outputs.contains(attribute))
}

/// Evaluate every attribute of one declaration
pub(crate) fn evaluate_attributes(
    store: &DeclarationStore,
    address: &Address,
    scope: &dyn Scope,
) -> std::result::Result<EvaluatedAttributes, ValidationError> {
    let mut evaluated = EvaluatedAttributes::new();
    let Some(expressions) = store.expressions(address) else {
        return Ok(evaluated);
    };
    for (name, expr) in expressions {
        let mut value = expr
            .evaluate(scope)
            .map_err(|e| e.into_validation(address, name))?;
        value.sensitive |= store.is_sensitive(address, name);
        evaluated.insert(name.clone(), value);
    }
    Ok(evaluated)
}

/// Plan convergence of the declarations against a snapshot
pub fn plan(
    store: &DeclarationStore,
    snapshot: &Snapshot,
    registry: &ProviderRegistry,
) -> Result<Plan> {
    let activity = store.validate()?;
    let order = resolver::apply_order(store)?;

    let mut plan = Plan::default();
    let mut pending: BTreeMap<Address, Pending> = BTreeMap::new();
    let mut retired: Vec<(Address, String)> = Vec::new();

    for address in &order {
        if let Some(reason) = activity.reason(address) {
            if snapshot.contains(address) {
                retired.push((address.clone(), reason.to_string()));
            } else {
                log::debug!("{address} is counted out and not provisioned");
                plan.skipped.push((address.clone(), reason.clone()));
            }
            continue;
        }

        let schema = registry.schema(&address.resource_type)?;
        let scope = PlanScope {
            store,
            snapshot,
            registry,
            pending: &pending,
        };
        let desired = evaluate_attributes(store, address, &scope)?;
        let current = snapshot.inputs(address);
        let changes = compute_changes(&desired, current.as_ref(), &schema, &|name| {
            store.is_sensitive(address, name)
        });
        let action = classify(current.is_some(), &changes);

        let reason = (action == Action::Replace).then(|| {
            let forced: Vec<&str> = changes
                .iter()
                .filter(|c| c.forces_replacement)
                .map(|c| c.name.as_str())
                .collect();
            format!("{} forces replacement", forced.join(", "))
        });

        log::debug!("{address}: {action}");
        pending.insert(
            address.clone(),
            Pending {
                action,
                desired,
                changed: changes.iter().map(|c| c.name.clone()).collect(),
            },
        );
        plan.steps.push(PlanStep {
            address: address.clone(),
            action,
            changes,
            dependencies: store.dependencies(address).to_vec(),
            reason,
        });
    }

    for address in snapshot.addresses() {
        if !store.contains(address) {
            registry.get(&address.resource_type)?;
            retired.push((address.clone(), "no longer declared".to_string()));
        }
    }

    plan.steps
        .extend(destroy_steps(store, snapshot, retired)?);
    Ok(plan)
}

/// Plan a teardown of everything provisioned, or of selected targets
///
/// Without targets the declarations are not validated: a template with a
/// blank setting can still be torn down.
pub fn plan_destroy(
    store: &DeclarationStore,
    snapshot: &Snapshot,
    registry: &ProviderRegistry,
    targets: Option<&BTreeSet<Address>>,
) -> Result<Plan> {
    let selected: Vec<Address> = match targets {
        None => snapshot.addresses().cloned().collect(),
        Some(targets) => {
            for target in targets {
                if !store.contains(target) && !snapshot.contains(target) {
                    return Err(ValidationError::UnknownTarget {
                        address: target.clone(),
                    }
                    .into());
                }
            }

            let activity = store.validate()?;
            resolver::destroy_order(store, &activity, targets)?;

            for (address, record) in &snapshot.resources {
                if targets.contains(address) {
                    continue;
                }
                if let Some(target) = record.dependencies.iter().find(|d| targets.contains(*d)) {
                    return Err(GraphError::DanglingReference {
                        from: address.clone(),
                        target: target.clone(),
                    }
                    .into());
                }
            }

            targets
                .iter()
                .filter(|t| snapshot.contains(t))
                .cloned()
                .collect()
        }
    };

    for address in &selected {
        registry.get(&address.resource_type)?;
    }

    let retired = selected
        .into_iter()
        .map(|a| (a, "destroy requested".to_string()))
        .collect();
    Ok(Plan {
        steps: destroy_steps(store, snapshot, retired)?,
        skipped: Vec::new(),
    })
}

/// Order destroys so that consumers go before their producers
///
/// Edges are the dependencies recorded in the snapshot plus the declared
/// ones. Ties follow reverse apply order, with undeclared resources ahead of
/// declared ones.
fn destroy_steps(
    store: &DeclarationStore,
    snapshot: &Snapshot,
    retired: Vec<(Address, String)>,
) -> Result<Vec<PlanStep>> {
    let recorded = |address: &Address| -> Vec<Address> {
        let mut deps: Vec<Address> = snapshot
            .record(address)
            .map(|r| r.dependencies.clone())
            .unwrap_or_default();
        for dep in store.dependencies(address) {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        deps
    };

    let reasons: BTreeMap<Address, String> = retired.into_iter().collect();

    let mut seed = resolver::apply_order(store)?;
    seed.retain(|a| reasons.contains_key(a));
    seed.extend(reasons.keys().filter(|a| !store.contains(a)).cloned());

    let mut order = resolver::topological_order(&seed, recorded)?;
    order.reverse();

    // A destroy waits for the destroys of everything that consumes it
    Ok(order
        .iter()
        .map(|address| {
            let mut step = PlanStep::destroy(
                address.clone(),
                reasons.get(address).cloned().unwrap_or_default(),
            );
            step.dependencies = order
                .iter()
                .filter(|other| recorded(other).contains(address))
                .cloned()
                .collect();
            step
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AttributeDiff, CallContext, Provider};
    use crate::diff::PlannedValue;
    use crate::error::{Error, ProviderError};
    use crate::state::{ResourceRecord, SecretRecord};
    use crate::store::{Declaration, Settings};
    use crate::types::{Attributes, ResourceSchema, Value};
    use std::sync::Arc;

    struct Schema(ResourceSchema);

    impl Provider for Schema {
        fn schema(&self) -> ResourceSchema {
            self.0.clone()
        }

        fn create(&self, _: &CallContext<'_>, _: &Attributes) -> Result<Attributes, ProviderError> {
            Err(ProviderError::Other("planning must not call providers".into()))
        }

        fn update(
            &self,
            _: &CallContext<'_>,
            _: &str,
            _: &AttributeDiff,
        ) -> Result<Attributes, ProviderError> {
            Err(ProviderError::Other("planning must not call providers".into()))
        }

        fn destroy(&self, _: &CallContext<'_>, _: &str) -> Result<(), ProviderError> {
            Err(ProviderError::Other("planning must not call providers".into()))
        }
    }

    type Result<T, E = ProviderError> = std::result::Result<T, E>;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn registry() -> ProviderRegistry {
        let plain = || Arc::new(Schema(ResourceSchema::default()));
        ProviderRegistry::new()
            .with("vpc_network", plain())
            .with(
                "vpc_subnet",
                Arc::new(Schema(
                    ResourceSchema::default().with_immutable(["zone", "network_id"]),
                )),
            )
            .with("datatransfer_endpoint", plain())
            .with("datatransfer_transfer", plain())
            .with(
                "iam_static_access_key",
                Arc::new(Schema(
                    ResourceSchema::default().with_sensitive_outputs(["secret_key"]),
                )),
            )
            .with("lockbox_secret", plain())
    }

    fn pipeline(settings: Settings) -> DeclarationStore {
        let mut store = DeclarationStore::new(settings);
        store
            .register(vec![
                Declaration::new("vpc_network", "main").attribute("name", "analytics"),
                Declaration::new("vpc_subnet", "a")
                    .attribute("network_id", "${vpc_network.main.id}")
                    .attribute("zone", "ru-central1-a"),
                Declaration::new("datatransfer_endpoint", "target")
                    .attribute("subnet_id", "${vpc_subnet.a.id}"),
                Declaration::new("datatransfer_transfer", "main")
                    .count("${var.transfer_enabled}")
                    .attribute("source_id", "${var.source_endpoint_id}")
                    .attribute("target_id", "${datatransfer_endpoint.target.id}"),
            ])
            .unwrap();
        store
    }

    fn off() -> Settings {
        Settings::new()
            .with("transfer_enabled", 0)
            .with("source_endpoint_id", "")
    }

    fn on() -> Settings {
        Settings::new()
            .with("transfer_enabled", 1)
            .with("source_endpoint_id", "dtte-source")
    }

    fn record(id: &str, inputs: &[(&str, Value)], deps: &[&str]) -> ResourceRecord {
        let mut record = ResourceRecord::new(id);
        record.attributes = inputs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        record.dependencies = deps.iter().map(|d| addr(d)).collect();
        record
    }

    /// Snapshot matching the pipeline with the transfer disabled
    fn provisioned() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.upsert(
            addr("vpc_network.main"),
            record("enp-1", &[("name", Value::from("analytics"))], &[]),
            SecretRecord::default(),
        );
        snapshot.upsert(
            addr("vpc_subnet.a"),
            record(
                "e9b-1",
                &[
                    ("network_id", Value::from("enp-1")),
                    ("zone", Value::from("ru-central1-a")),
                ],
                &["vpc_network.main"],
            ),
            SecretRecord::default(),
        );
        snapshot.upsert(
            addr("datatransfer_endpoint.target"),
            record(
                "dtte-1",
                &[("subnet_id", Value::from("e9b-1"))],
                &["vpc_subnet.a"],
            ),
            SecretRecord::default(),
        );
        snapshot
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let store = pipeline(off());
        let plan = plan(&store, &Snapshot::new(), &registry()).unwrap();
        let steps: Vec<(String, Action)> = plan
            .steps
            .iter()
            .map(|s| (s.address.to_string(), s.action))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("vpc_network.main".to_string(), Action::Create),
                ("vpc_subnet.a".to_string(), Action::Create),
                ("datatransfer_endpoint.target".to_string(), Action::Create),
            ]
        );
        let subnet = plan.step(&addr("vpc_subnet.a")).unwrap();
        let network_id = subnet.changes.iter().find(|c| c.name == "network_id").unwrap();
        assert_eq!(network_id.after, PlannedValue::Unknown);
    }

    #[test]
    fn test_matching_state_is_all_noop() {
        let store = pipeline(off());
        let plan = plan(&store, &provisioned(), &registry()).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().unchanged, 3);
    }

    #[test]
    fn test_toggle_off_has_no_transfer_step() {
        let store = pipeline(off());
        let plan = plan(&store, &provisioned(), &registry()).unwrap();
        let transfer = addr("datatransfer_transfer.main");
        assert!(plan.step(&transfer).is_none());
        assert_eq!(plan.skipped, vec![(transfer, Inactive::CountZero)]);
    }

    #[test]
    fn test_toggle_on_creates_exactly_one_transfer() {
        let store = pipeline(on());
        let plan = plan(&store, &provisioned(), &registry()).unwrap();
        let creates: Vec<&PlanStep> = plan
            .changes()
            .filter(|s| s.action == Action::Create)
            .collect();
        assert_eq!(creates.len(), 1);
        let transfer = creates[0];
        assert_eq!(transfer.address, addr("datatransfer_transfer.main"));
        assert_eq!(
            transfer.dependencies,
            vec![addr("datatransfer_endpoint.target")]
        );
        let target = transfer.changes.iter().find(|c| c.name == "target_id").unwrap();
        assert_eq!(target.after, PlannedValue::Known(Value::from("dtte-1")));
    }

    #[test]
    fn test_toggle_back_off_destroys_transfer() {
        let mut snapshot = provisioned();
        snapshot.upsert(
            addr("datatransfer_transfer.main"),
            record("dtt-1", &[], &["datatransfer_endpoint.target"]),
            SecretRecord::default(),
        );
        let plan = plan(&pipeline(off()), &snapshot, &registry()).unwrap();
        let step = plan.step(&addr("datatransfer_transfer.main")).unwrap();
        assert_eq!(step.action, Action::Destroy);
        assert_eq!(step.reason.as_deref(), Some("count is 0"));
    }

    #[test]
    fn test_immutable_change_replaces_and_cascades() {
        let mut store = DeclarationStore::new(off());
        store
            .register(vec![
                Declaration::new("vpc_network", "main").attribute("name", "analytics"),
                Declaration::new("vpc_subnet", "a")
                    .attribute("network_id", "${vpc_network.main.id}")
                    .attribute("zone", "ru-central1-b"),
                Declaration::new("datatransfer_endpoint", "target")
                    .attribute("subnet_id", "${vpc_subnet.a.id}"),
            ])
            .unwrap();
        let plan = plan(&store, &provisioned(), &registry()).unwrap();
        let subnet = plan.step(&addr("vpc_subnet.a")).unwrap();
        assert_eq!(subnet.action, Action::Replace);
        assert_eq!(subnet.reason.as_deref(), Some("zone forces replacement"));
        // The new subnet id is only known after apply
        assert_eq!(
            plan.step(&addr("datatransfer_endpoint.target")).unwrap().action,
            Action::Update
        );
    }

    #[test]
    fn test_orphans_destroyed_last_consumers_first() {
        let mut snapshot = provisioned();
        snapshot.upsert(
            addr("iam_static_access_key.old"),
            record("aje-1", &[], &[]),
            SecretRecord::default(),
        );
        snapshot.upsert(
            addr("lockbox_secret.old"),
            record("e6q-1", &[], &["iam_static_access_key.old"]),
            SecretRecord::default(),
        );
        let plan = plan(&pipeline(off()), &snapshot, &registry()).unwrap();
        let destroys: Vec<String> = plan
            .changes()
            .map(|s| s.address.to_string())
            .collect();
        assert_eq!(destroys, vec!["lockbox_secret.old", "iam_static_access_key.old"]);
        assert_eq!(
            plan.steps.last().unwrap().dependencies,
            vec![addr("lockbox_secret.old")]
        );
    }

    #[test]
    fn test_sensitive_output_flows_as_sensitive() {
        let mut store = DeclarationStore::new(Settings::new());
        store
            .register(vec![
                Declaration::new("iam_static_access_key", "sa"),
                Declaration::new("lockbox_secret", "keys")
                    .attribute("payload", "key=${iam_static_access_key.sa.secret_key}"),
            ])
            .unwrap();
        let mut snapshot = Snapshot::new();
        let mut secrets = SecretRecord::default();
        secrets
            .outputs
            .insert("secret_key".into(), Value::from("s3cr3t"));
        snapshot.upsert(
            addr("iam_static_access_key.sa"),
            ResourceRecord::new("aje-1"),
            secrets,
        );
        let plan = plan(&store, &snapshot, &registry()).unwrap();
        let payload = &plan.step(&addr("lockbox_secret.keys")).unwrap().changes[0];
        assert!(payload.sensitive);
        assert_eq!(payload.after, PlannedValue::Known(Value::from("key=s3cr3t")));
    }

    #[test]
    fn test_missing_provider() {
        let mut store = DeclarationStore::new(Settings::new());
        store
            .register(vec![Declaration::new("storage_bucket", "raw")])
            .unwrap();
        let err = plan(&store, &Snapshot::new(), &registry()).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoProvider { .. })
        ));
    }

    #[test]
    fn test_full_destroy_is_reverse_of_create() {
        let store = pipeline(off());
        let snapshot = provisioned();
        let create: Vec<Address> = plan(&store, &Snapshot::new(), &registry())
            .unwrap()
            .steps
            .into_iter()
            .map(|s| s.address)
            .collect();
        let mut destroy: Vec<Address> = plan_destroy(&store, &snapshot, &registry(), None)
            .unwrap()
            .steps
            .into_iter()
            .map(|s| s.address)
            .collect();
        destroy.reverse();
        assert_eq!(destroy, create);
    }

    #[test]
    fn test_targeted_destroy() {
        let store = pipeline(off());
        let snapshot = provisioned();

        let leaf = BTreeSet::from([addr("datatransfer_endpoint.target")]);
        let plan = plan_destroy(&store, &snapshot, &registry(), Some(&leaf)).unwrap();
        assert_eq!(plan.steps.len(), 1);

        let root = BTreeSet::from([addr("vpc_network.main")]);
        let err = plan_destroy(&store, &snapshot, &registry(), Some(&root)).unwrap_err();
        assert!(matches!(
            err,
            Error::Graph(GraphError::DanglingReference { .. })
        ));

        let unknown = BTreeSet::from([addr("storage_bucket.nope")]);
        let err = plan_destroy(&store, &snapshot, &registry(), Some(&unknown)).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_waves() {
        let store = pipeline(on());
        let plan = plan(&store, &Snapshot::new(), &registry()).unwrap();
        let waves: Vec<Vec<String>> = plan
            .waves()
            .iter()
            .map(|w| w.iter().map(|s| s.address.to_string()).collect())
            .collect();
        assert_eq!(
            waves,
            vec![
                vec!["vpc_network.main"],
                vec!["vpc_subnet.a"],
                vec!["datatransfer_endpoint.target"],
                vec!["datatransfer_transfer.main"],
            ]
        );
    }

    #[test]
    fn test_counted_out_consumer_destroyed_before_removed_producer() {
        let mut snapshot = provisioned();
        snapshot.upsert(
            addr("iam_static_access_key.old"),
            record("aje-1", &[], &[]),
            SecretRecord::default(),
        );
        snapshot.upsert(
            addr("datatransfer_transfer.main"),
            record(
                "dtt-1",
                &[],
                &["datatransfer_endpoint.target", "iam_static_access_key.old"],
            ),
            SecretRecord::default(),
        );
        let plan = plan(&pipeline(off()), &snapshot, &registry()).unwrap();
        let destroys: Vec<String> = plan
            .changes()
            .map(|s| s.address.to_string())
            .collect();
        assert_eq!(
            destroys,
            vec!["datatransfer_transfer.main", "iam_static_access_key.old"]
        );

        let waves: Vec<Vec<String>> = plan
            .waves()
            .iter()
            .map(|w| w.iter().map(|s| s.address.to_string()).collect())
            .collect();
        assert_eq!(
            waves,
            vec![
                vec!["datatransfer_transfer.main"],
                vec!["iam_static_access_key.old"],
            ]
        );
    }

    #[test]
    fn test_waves_see_through_unchanged_steps() {
        let mut store = DeclarationStore::new(Settings::new());
        store
            .register(vec![
                Declaration::new("vpc_network", "main").attribute("name", "analytics"),
                Declaration::new("lockbox_secret", "b").depends_on("vpc_network.main"),
                Declaration::new("datatransfer_endpoint", "c")
                    .attribute("secret_id", "${lockbox_secret.b.id}")
                    .attribute("name", "new"),
            ])
            .unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.upsert(
            addr("lockbox_secret.b"),
            record("e6q-1", &[], &[]),
            SecretRecord::default(),
        );
        snapshot.upsert(
            addr("datatransfer_endpoint.c"),
            record(
                "dtte-1",
                &[
                    ("secret_id", Value::from("e6q-1")),
                    ("name", Value::from("old")),
                ],
                &["lockbox_secret.b"],
            ),
            SecretRecord::default(),
        );
        let plan = plan(&store, &snapshot, &registry()).unwrap();
        assert_eq!(
            plan.step(&addr("lockbox_secret.b")).unwrap().action,
            Action::NoOp
        );

        let waves: Vec<Vec<String>> = plan
            .waves()
            .iter()
            .map(|w| w.iter().map(|s| s.address.to_string()).collect())
            .collect();
        assert_eq!(
            waves,
            vec![vec!["vpc_network.main"], vec!["datatransfer_endpoint.c"]]
        );
    }
}
