use diesel::prelude::*;
use domain::{AppValue, DomainError, Filter};

use super::models::{AppStateModel, AppStateRow};
use super::predicate::build;
use super::store_error::StoreResult;
use crate::database::app_state;

fn find_model(conn: &mut SqliteConnection, name: &str) -> StoreResult<Option<AppStateModel>> {
    Ok(app_state::table
        .filter(app_state::name.eq(name))
        .select(AppStateModel::as_select())
        .first::<AppStateModel>(conn)
        .optional()?)
}

pub(crate) fn get(conn: &mut SqliteConnection, name: &str) -> StoreResult<Option<AppValue>> {
    find_model(conn, name)?
        .map(AppValue::try_from)
        .transpose()
        .map_err(Into::into)
}

/// Stores `value` under `name`, refusing to change the type of a typed key.
pub(crate) fn set(conn: &mut SqliteConnection, name: &str, value: &AppValue) -> StoreResult<()> {
    conn.transaction(|conn| {
        let row = AppStateRow::new(name, value);
        match find_model(conn, name)? {
            Some(existing) => {
                let stored = AppValue::try_from(existing)?;
                if !stored.accepts(value) {
                    return Err(DomainError::TypeMismatch {
                        name: name.to_string(),
                        stored: stored.kind().to_string(),
                        given: value.kind().to_string(),
                    }
                    .into());
                }
                diesel::update(app_state::table.filter(app_state::name.eq(name)))
                    .set(&row)
                    .execute(conn)?;
            }
            None => {
                diesel::insert_into(app_state::table)
                    .values(&row)
                    .execute(conn)?;
            }
        }
        Ok(())
    })
}

pub(crate) fn reset(conn: &mut SqliteConnection, name: &str) -> StoreResult<()> {
    diesel::delete(app_state::table.filter(app_state::name.eq(name))).execute(conn)?;
    Ok(())
}

pub(crate) fn delete_where(conn: &mut SqliteConnection, filter: &Filter) -> StoreResult<usize> {
    Ok(diesel::delete(app_state::table)
        .filter(build::<app_state::table>(filter)?)
        .execute(conn)?)
}
