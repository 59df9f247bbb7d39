//! Process-wide cache of table mappings, one per entity type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::error::Result;
use crate::schema::{CreateFlags, Entity, Mapping};

type Registry = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

static MAPPINGS: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Returns the mapping of `T`, building it with no flags on first use.
///
/// # Errors
///
/// Returns the reflection error if `T` cannot be mapped.
pub fn mapping<T: Entity>() -> Result<Arc<Mapping<T>>> {
    if let Some(cached) = cached::<T>() {
        return Ok(cached);
    }
    Ok(store(Mapping::<T>::build(CreateFlags::NONE)?))
}

/// Returns the mapping of `T` for explicit flags.
///
/// A cached mapping built with other flags is rebuilt and replaced.
///
/// # Errors
///
/// Returns the reflection error if `T` cannot be mapped.
pub fn mapping_with_flags<T: Entity>(flags: CreateFlags) -> Result<Arc<Mapping<T>>> {
    if let Some(cached) = cached::<T>() {
        if cached.flags == flags {
            return Ok(cached);
        }
    }
    let built = Arc::new(Mapping::<T>::build(flags)?);
    MAPPINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(TypeId::of::<T>(), Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
    Ok(built)
}

/// Clears every cached mapping.
pub fn reset_mappings() {
    MAPPINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

fn cached<T: Entity>() -> Option<Arc<Mapping<T>>> {
    let entry = MAPPINGS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&TypeId::of::<T>())
        .cloned()?;
    entry.downcast::<Mapping<T>>().ok()
}

// Another thread may have stored a mapping meanwhile; the first one stays.
fn store<T: Entity>(built: Mapping<T>) -> Arc<Mapping<T>> {
    let mut map = MAPPINGS.write().unwrap_or_else(PoisonError::into_inner);
    let id = TypeId::of::<T>();
    if let Some(existing) = map
        .get(&id)
        .cloned()
        .and_then(|entry| entry.downcast::<Mapping<T>>().ok())
    {
        return existing;
    }
    let built = Arc::new(built);
    map.insert(id, Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
    built
}
