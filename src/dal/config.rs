/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Raw key/value access to the config table. Typed reads and validation
//! live in [`crate::config`].

use diesel::prelude::*;

use super::models::ConfigRow;
use super::DAL;
use crate::database::schema::config;
use crate::error::QueueError;

pub struct ConfigDal<'a> {
    pub dal: &'a DAL,
}

impl<'a> ConfigDal<'a> {
    pub fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.dal.pool.get()?;
        let value = config::table
            .find(key)
            .select(config::value)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let row = ConfigRow {
            key: key.to_string(),
            value: value.to_string(),
        };
        let mut conn = self.dal.pool.get()?;
        diesel::replace_into(config::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }
}
