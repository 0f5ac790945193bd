use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rayon::prelude::*;
use tracing::debug;

use crate::classfile::{self, ACC_PRIVATE, ClassNode, MemberKey};
use crate::error::{ClassFileError, DesugarError};

/// What the nest pass needs to know about one archive class.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassShape {
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) nest_host: Option<String>,
    pub(crate) nest_members: Vec<String>,
    pub(crate) methods: Vec<MethodShape>,
}

#[derive(Clone, Debug)]
pub(crate) struct MethodShape {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access_flags: u16,
}

impl MethodShape {
    fn is_private(&self) -> bool {
        self.access_flags & ACC_PRIVATE != 0
    }
}

impl ClassShape {
    pub(crate) fn of(class: &ClassNode) -> Result<Self, ClassFileError> {
        Ok(Self {
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            nest_host: classfile::nest_host(class)?,
            nest_members: classfile::nest_members(class)?,
            methods: class
                .methods
                .iter()
                .map(|method| MethodShape {
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    access_flags: method.access_flags,
                })
                .collect(),
        })
    }

    fn in_nest(&self) -> bool {
        self.nest_host.is_some() || !self.nest_members.is_empty()
    }
}

/// Every class in the input archive, keyed by internal name, plus the
/// private methods that must be renamed before their nest is flattened.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassIndex {
    classes: BTreeMap<String, ClassShape>,
    renames: BTreeMap<MemberKey, String>,
}

impl ClassIndex {
    /// Decodes each `.class` entry in parallel. When a class appears more
    /// than once (multi-release jars), the first entry wins.
    pub(crate) fn build(entries: &[(&str, &[u8])]) -> Result<Self, DesugarError> {
        let decoded = entries
            .par_iter()
            .map(|(entry, data)| {
                let malformed = |source| DesugarError::MalformedClass {
                    entry: entry.to_string(),
                    source,
                };
                let class = classfile::decode(data).map_err(malformed)?;
                let shape = ClassShape::of(&class).map_err(malformed)?;
                Ok((class.name, shape))
            })
            .collect::<Result<Vec<_>, DesugarError>>()?;

        let mut classes = BTreeMap::new();
        for (name, shape) in decoded {
            classes.entry(name).or_insert(shape);
        }
        Ok(Self::new(classes))
    }

    pub(crate) fn new(classes: BTreeMap<String, ClassShape>) -> Self {
        let renames = plan_renames(&classes);
        for (key, renamed) in &renames {
            debug!(
                class = %key.owner,
                method = %key.name,
                descriptor = %key.descriptor,
                renamed = %renamed,
                "private method collides with a related class"
            );
        }
        Self { classes, renames }
    }

    #[cfg(test)]
    pub(crate) fn from_names(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .map(|name| (name.to_string(), ClassShape::default()))
                .collect(),
        )
    }

    pub(crate) fn contains(&self, internal_name: &str) -> bool {
        self.classes.contains_key(internal_name)
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// New name for a private method whose widening would collide.
    pub(crate) fn renamed(&self, key: &MemberKey) -> Option<&str> {
        self.renames.get(key).map(String::as_str)
    }

    pub(crate) fn rename_count(&self) -> usize {
        self.renames.len()
    }
}

/// Whether the nest pass will widen this class's private members.
fn is_flattened(classes: &BTreeMap<String, ClassShape>, shape: &ClassShape) -> bool {
    if !shape.in_nest() {
        return false;
    }
    match &shape.nest_host {
        Some(host) => classes.contains_key(host),
        None => true,
    }
}

/// Superclasses and superinterfaces reachable inside the archive.
fn ancestors<'a>(classes: &'a BTreeMap<String, ClassShape>, name: &'a str) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([name]);
    while let Some(current) = queue.pop_front() {
        let Some(shape) = classes.get(current) else {
            continue;
        };
        for parent in shape.super_name.iter().chain(&shape.interfaces) {
            if seen.insert(parent.as_str()) {
                queue.push_back(parent.as_str());
            }
        }
    }
    seen.remove(name);
    seen
}

fn is_initializer(name: &str) -> bool {
    name == "<init>" || name == "<clinit>"
}

/// Private methods in flattened classes that share a name and descriptor
/// with a method an ancestor or descendant will expose after widening.
///
/// Left alone, the widened copy overrides (or is overridden by) the related
/// method, and a `final` override fails class loading.
fn plan_renames(classes: &BTreeMap<String, ClassShape>) -> BTreeMap<MemberKey, String> {
    let ancestry: BTreeMap<&str, BTreeSet<&str>> = classes
        .keys()
        .map(|name| (name.as_str(), ancestors(classes, name)))
        .collect();

    // (name, descriptor) -> classes whose declaration stays or becomes visible
    let mut visible: BTreeMap<(&str, &str), Vec<&str>> = BTreeMap::new();
    for (owner, shape) in classes {
        let flattened = is_flattened(classes, shape);
        for method in &shape.methods {
            if is_initializer(&method.name) || (method.is_private() && !flattened) {
                continue;
            }
            visible
                .entry((method.name.as_str(), method.descriptor.as_str()))
                .or_default()
                .push(owner.as_str());
        }
    }

    let related = |left: &str, right: &str| {
        ancestry.get(left).is_some_and(|set| set.contains(right))
            || ancestry.get(right).is_some_and(|set| set.contains(left))
    };

    let mut renames = BTreeMap::new();
    for (owner, shape) in classes {
        if !is_flattened(classes, shape) {
            continue;
        }
        for method in &shape.methods {
            if !method.is_private() || is_initializer(&method.name) {
                continue;
            }
            let Some(declarers) = visible.get(&(method.name.as_str(), method.descriptor.as_str()))
            else {
                continue;
            };
            if declarers
                .iter()
                .any(|other| *other != owner.as_str() && related(owner.as_str(), other))
            {
                renames.insert(
                    MemberKey::new(owner, &method.name, &method.descriptor),
                    private_name(owner, &method.name),
                );
            }
        }
    }
    renames
}

/// `helper` in `com/acme/Foo$Inner` becomes `helper$com$acme$Foo$Inner`.
fn private_name(owner: &str, name: &str) -> String {
    format!("{name}${}", owner.replace('/', "$"))
}
