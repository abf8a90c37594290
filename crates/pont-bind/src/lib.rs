//! pont-bind — Face hôte du pont natif↔scripting
//!
//! Objectif : offrir le **registre de liaisons** côté hôte. Le code embarqué
//! appelle des fonctions natives par nom complet (`module.name`), le pont
//! marshalle les arguments (scalaires, texte, octets, tranches scratch),
//! contrôle l'arité et comptabilise les fautes.
//!
//! - `Value`   : type dynamique échangé (Null/Bool/I64/F64/Str/Bytes/Scratch)
//! - `Bridge`  : registre de liaisons (ordre d'insertion stable), dispatch, stats
//! - `HostCtx` : contexte passé aux natives (stdout capturable, env, scratch)
//! - `bind`, `call`, `with_defaults()` (`pont.version`, `pont.debug`)
//! - `pont_native!` : macro pour écrire une native en 2 lignes
//! - rapport de debug sérialisable + dump texte, déclenchable côté embarqué
//!
//! ⚠️ Ce crate **n'exécute pas** de code embarqué : il est la face hôte du
//! pont. L'arène des tampons temporaires vit dans `pont-scratch`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};

use indexmap::IndexMap;
use thiserror::Error;

use pont_scratch::{ScratchAddr, ScratchArena, ScratchError};

pub use pont_scratch::{Checkpoint, PageId, ScratchScope};

/* --------------------------- Types de valeur --------------------------- */

/// Tranche scratch transportée par valeur : adresse typée + longueur.
///
/// Les octets vivent dans l'arène du [`HostCtx`]; la tranche reste lisible
/// jusqu'au rollback qui la recouvre, ensuite tout accès échoue proprement.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScratchSlice {
    addr: ScratchAddr,
    len: u32,
}

impl ScratchSlice {
    /// Construit une tranche (longueur en octets).
    pub const fn new(addr: ScratchAddr, len: u32) -> Self { Self { addr, len } }
    /// Adresse de départ.
    pub const fn addr(self) -> ScratchAddr { self.addr }
    /// Longueur en octets.
    pub const fn len(self) -> u32 { self.len }
    /// Vrai si la tranche est vide.
    pub const fn is_empty(self) -> bool { self.len == 0 }
}

impl fmt::Debug for ScratchSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.addr, self.len)
    }
}

/// Valeur dynamique échangée avec les natives.
///
/// Simple, mais suffisante pour l'essentiel du trafic du pont : num/texte/
/// octets, plus la tranche scratch pour les gros tampons sans copie.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Null / absence de valeur.
    Null,
    /// Booléen.
    Bool(bool),
    /// Entier 64 bits signé.
    I64(i64),
    /// Flottant 64 bits.
    F64(f64),
    /// Chaîne UTF-8 possédée.
    Str(String),
    /// Blob binaire possédé.
    Bytes(Vec<u8>),
    /// Tranche dans l'arène scratch (zéro copie côté pont).
    Scratch(ScratchSlice),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::I64(i) => write!(f, "I64({i})"),
            Value::F64(x) => write!(f, "F64({x})"),
            Value::Str(s) => {
                if s.len() > 64 {
                    // coupe sur une frontière de caractère
                    let mut cut = 64;
                    while !s.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    write!(f, "Str({}…)", &s[..cut])
                } else {
                    write!(f, "Str({s})")
                }
            }
            Value::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Value::Scratch(s) => write!(f, "Scratch({s:?})"),
        }
    }
}

/* Conversions convivia-les */
impl From<()> for Value { fn from(_: ()) -> Self { Value::Null } }
impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::I64(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::I64(v as i64) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::F64(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::F64(v as f64) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }
impl From<Vec<u8>> for Value { fn from(v: Vec<u8>) -> Self { Value::Bytes(v) } }
impl From<&[u8]> for Value { fn from(v: &[u8]) -> Self { Value::Bytes(v.to_vec()) } }
impl From<ScratchSlice> for Value { fn from(v: ScratchSlice) -> Self { Value::Scratch(v) } }

impl TryFrom<Value> for bool {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v { Value::Bool(b) => Ok(b), _ => Err(Error::Type("bool".into())) }
    }
}
impl TryFrom<Value> for i64 {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v {
            Value::I64(i) => Ok(i),
            Value::F64(x) => Ok(x as i64),
            _ => Err(Error::Type("i64".into())),
        }
    }
}
impl TryFrom<Value> for f64 {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v {
            Value::F64(x) => Ok(x),
            Value::I64(i) => Ok(i as f64),
            _ => Err(Error::Type("f64".into())),
        }
    }
}
impl TryFrom<Value> for String {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v { Value::Str(s) => Ok(s), _ => Err(Error::Type("string".into())) }
    }
}
impl TryFrom<Value> for Vec<u8> {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v { Value::Bytes(b) => Ok(b), _ => Err(Error::Type("bytes".into())) }
    }
}
impl TryFrom<Value> for ScratchSlice {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v { Value::Scratch(s) => Ok(s), _ => Err(Error::Type("scratch".into())) }
    }
}

/* ------------------------------ Erreurs ------------------------------ */

/// Erreurs du pont.
#[derive(Debug, Error)]
pub enum Error {
    /// Liaison introuvable.
    #[error("liaison introuvable: {0}")]
    NotFound(String),

    /// Nom déjà pris (passer par `rebind` pour remplacer).
    #[error("liaison en double: {0}")]
    Duplicate(String),

    /// Arité invalide (n args attendus).
    #[error("mauvaise arité: attendu {expected}, reçu {got}")]
    Arity {
        /// Nombre d'arguments attendus par la liaison.
        expected: usize,
        /// Nombre d'arguments effectivement fournis lors de l'appel.
        got: usize,
    },

    /// Type inattendu (message court).
    #[error("type invalide: {0}")]
    Type(String),

    /// Octets non UTF-8 là où une chaîne est attendue.
    #[error("utf-8 invalide dans la tranche scratch")]
    Utf8,

    /// Faute de l'arène scratch (réservation ou accès).
    #[error("scratch: {0}")]
    Scratch(#[from] ScratchError),

    /// I/O hôte.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// Message générique remonté par une native.
    #[error("{0}")]
    Msg(String),
}

/// Résultat du pont.
pub type PResult<T> = std::result::Result<T, Error>;

/* -------------------------- Signature des liaisons -------------------------- */

/// Fonction native liée : reçoit des **Values** et un **contexte** mut.
/// Retourne une Value (ou une erreur), pas d'allocs exotiques.
pub type BoundFn = fn(&[Value], &mut HostCtx) -> PResult<Value>;

/// Descripteur d'une liaison.
#[derive(Clone)]
pub struct Binding {
    /// Nom complet `module.name`.
    pub name: String,
    /// Arité (si connue). Si `None`, libre.
    pub arity: Option<usize>,
    /// Pointeur de fonction.
    pub func: BoundFn,
}

/* ------------------------------ Contexte ------------------------------ */

/// Contexte passé aux natives (stdout, env, scratch).
pub struct HostCtx {
    /// Sortie vers laquelle les natives écrivent (capturable en tests).
    pub stdout: Box<dyn Write + Send>,
    /// Petit KV store global (utile pour partager un état entre natives).
    pub env: HashMap<String, Value>,
    /// Arène des tampons temporaires du pont.
    pub scratch: ScratchArena,
    debug_requested: bool,
}

impl HostCtx {
    fn new() -> Self {
        Self {
            stdout: Box::new(io::stdout()),
            env: HashMap::new(),
            scratch: ScratchArena::new(),
            debug_requested: false,
        }
    }

    /// Écrit un texte brut dans `stdout`.
    pub fn write_str(&mut self, s: &str) -> io::Result<()> { self.stdout.write_all(s.as_bytes()) }

    /// Écrit une ligne terminée par `\n`.
    pub fn writeln_str(&mut self, s: &str) -> io::Result<()> {
        self.stdout.write_all(s.as_bytes())?;
        self.stdout.write_all(b"\n")
    }

    /// Copie `data` dans l'arène et rend la tranche transportable.
    pub fn stash(&mut self, data: &[u8]) -> PResult<ScratchSlice> {
        let addr = self.scratch.copy_in(data)?;
        Ok(ScratchSlice::new(addr, data.len() as u32))
    }

    /// Relit les octets d'une tranche. Refusé si elle a été recouverte
    /// par un rollback ([`ScratchError::Bounds`]).
    pub fn fetch(&self, slice: ScratchSlice) -> PResult<&[u8]> {
        Ok(self.scratch.slice(slice.addr(), slice.len() as usize)?)
    }

    /// Copie une chaîne dans l'arène (octets UTF-8).
    pub fn stash_str(&mut self, s: &str) -> PResult<ScratchSlice> {
        self.stash(s.as_bytes())
    }

    /// Relit une tranche comme chaîne UTF-8.
    pub fn fetch_str(&self, slice: ScratchSlice) -> PResult<&str> {
        std::str::from_utf8(self.fetch(slice)?).map_err(|_| Error::Utf8)
    }

    /// Demande un dump de debug; le pont l'émet au retour de l'appel en cours.
    pub fn request_debug(&mut self) { self.debug_requested = true; }

    fn take_debug_request(&mut self) -> bool { std::mem::take(&mut self.debug_requested) }
}

/* ------------------------------ Pont ------------------------------ */

/// Pont : registre de liaisons + contexte partagé + compteurs.
///
/// Tout passe par `&mut self` : aucun état global, aucun verrou. Un pont par
/// embarquement; pour du multi-thread, instancier plusieurs ponts.
pub struct Bridge {
    registry: IndexMap<String, Binding>,
    ctx: HostCtx,
    calls: u64,
    faults: u64,
}

impl Default for Bridge {
    fn default() -> Self { Self::new() }
}

impl Bridge {
    /// Crée un pont avec `stdout` réel, env vide, arène par défaut.
    pub fn new() -> Self {
        Self { registry: IndexMap::new(), ctx: HostCtx::new(), calls: 0, faults: 0 }
    }

    /// Variante utile pour tests : `stdout` capturé.
    pub fn with_captured_stdout() -> (Self, Captured) {
        let cap = Captured::default();
        let bridge = Self::new().with_stdout(cap.clone());
        (bridge, cap)
    }

    /// Permet d'injecter un writer custom (ex: buffer, fichier…).
    pub fn with_stdout<W: Write + Send + 'static>(mut self, w: W) -> Self {
        self.ctx.stdout = Box::new(w);
        self
    }

    /// Remplace l'arène scratch (taille de page ou plafond sur mesure).
    pub fn with_scratch(mut self, arena: ScratchArena) -> Self {
        self.ctx.scratch = arena;
        self
    }

    /// Accès lecture au contexte hôte.
    pub fn ctx(&self) -> &HostCtx { &self.ctx }
    /// Accès mutable au contexte hôte (env, scratch, stdout).
    pub fn ctx_mut(&mut self) -> &mut HostCtx { &mut self.ctx }
    /// Accès lecture à l'environnement global.
    pub fn env(&self) -> &HashMap<String, Value> { &self.ctx.env }
    /// Accès mutable à l'environnement global partagé entre les natives.
    pub fn env_mut(&mut self) -> &mut HashMap<String, Value> { &mut self.ctx.env }

    /// Enregistre une liaison sous son nom complet, arité libre.
    ///
    /// Un nom déjà pris est **refusé** ([`Error::Duplicate`]) : écraser une
    /// liaison en silence masque des collisions entre modules embarqués.
    /// Remplacer volontairement se fait via [`rebind`](Self::rebind).
    pub fn bind(&mut self, name: &str, func: BoundFn) -> PResult<()> {
        self.bind_entry(Binding { name: name.to_string(), arity: None, func })
    }

    /// Comme [`bind`](Self::bind), avec arité contrôlée à chaque appel.
    pub fn bind_with_arity(&mut self, name: &str, arity: usize, func: BoundFn) -> PResult<()> {
        self.bind_entry(Binding { name: name.to_string(), arity: Some(arity), func })
    }

    /// Enregistre un descripteur complet. Refuse les doublons.
    pub fn bind_entry(&mut self, entry: Binding) -> PResult<()> {
        if self.registry.contains_key(&entry.name) {
            return Err(Error::Duplicate(entry.name));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "pont::bridge", name = %entry.name, "liaison enregistrée");
        self.registry.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Enregistre un lot; s'arrête à la première collision.
    pub fn bind_all(&mut self, entries: &[(&str, Option<usize>, BoundFn)]) -> PResult<()> {
        for (name, arity, func) in entries {
            self.bind_entry(Binding { name: (*name).to_string(), arity: *arity, func: *func })?;
        }
        Ok(())
    }

    /// Remplace (ou crée) une liaison; rend l'ancienne s'il y en avait une.
    pub fn rebind(&mut self, entry: Binding) -> Option<Binding> {
        self.registry.insert(entry.name.clone(), entry)
    }

    /// Vrai si `name` est lié.
    pub fn contains<S: AsRef<str>>(&self, name: S) -> bool {
        self.registry.contains_key(name.as_ref())
    }
    /// Descripteur d'une liaison, si elle existe.
    pub fn get<S: AsRef<str>>(&self, name: S) -> Option<&Binding> {
        self.registry.get(name.as_ref())
    }
    /// Noms liés, dans l'ordre d'enregistrement.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }
    /// Nombre de liaisons.
    pub fn len(&self) -> usize { self.registry.len() }
    /// Vrai si aucun nom n'est lié.
    pub fn is_empty(&self) -> bool { self.registry.is_empty() }

    /// Appelle une liaison par `module.name` avec des arguments.
    ///
    /// Contrôle l'arité déclarée, dispatch, comptabilise appels et fautes,
    /// puis émet le dump de debug si une native l'a demandé via
    /// [`HostCtx::request_debug`].
    pub fn call<S: AsRef<str>>(&mut self, name: S, args: &[Value]) -> PResult<Value> {
        let key = name.as_ref();
        let entry = match self.registry.get(key) {
            Some(entry) => entry,
            None => {
                self.faults += 1;
                return Err(Error::NotFound(key.to_string()));
            }
        };
        if let Some(exp) = entry.arity {
            if args.len() != exp {
                self.faults += 1;
                return Err(Error::Arity { expected: exp, got: args.len() });
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(target: "pont::bridge", name = key, argc = args.len(), "dispatch");
        self.calls += 1;
        let func = entry.func;
        let out = func(args, &mut self.ctx);
        if out.is_err() {
            self.faults += 1;
        }
        if self.ctx.take_debug_request() {
            self.debug_dump()?;
        }
        out
    }

    /// Instantané des compteurs.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats { bindings: self.registry.len(), calls: self.calls, faults: self.faults }
    }

    /// Pont préchargé avec les liaisons de service (`pont.version`, `pont.debug`).
    pub fn with_defaults() -> Self {
        let mut bridge = Self::new();
        // registre vierge : aucune collision possible
        let _ = bridge.install_defaults();
        bridge
    }

    /// Ajoute les liaisons de service sur un pont existant.
    pub fn install_defaults(&mut self) -> PResult<()> {
        self.bind_all(&[
            ("pont.version", Some(0), native_version as BoundFn),
            ("pont.debug", Some(0), native_debug as BoundFn),
        ])
    }

    /// Photographie l'état du pont (liaisons, compteurs, scratch).
    pub fn debug_report(&self) -> BridgeReport {
        BridgeReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            stats: self.stats(),
            bindings: self
                .registry
                .values()
                .map(|b| BindingInfo { name: b.name.clone(), arity: b.arity })
                .collect(),
            scratch: ScratchStats {
                page_size: self.ctx.scratch.page_size(),
                pages: self.ctx.scratch.page_count(),
                current: self.ctx.scratch.current_page().0,
                used: self.ctx.scratch.total_used(),
                capacity: self.ctx.scratch.total_capacity(),
                watermarks: self.ctx.scratch.usage().map(|(_, used)| used).collect(),
            },
        }
    }

    /// Écrit le rapport texte sur le `stdout` du contexte.
    pub fn debug_dump(&mut self) -> PResult<()> {
        let text = self.debug_report().stringify();
        self.ctx.write_str(&text)?;
        Ok(())
    }
}

/* ------------------------------ Rapport de debug ------------------------------ */

/// Compteurs du pont.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeStats {
    /// Liaisons vivantes.
    pub bindings: usize,
    /// Appels dispatchés (arité validée).
    pub calls: u64,
    /// Fautes (nom inconnu, arité, erreur de native).
    pub faults: u64,
}

/// Ligne de rapport pour une liaison.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindingInfo {
    /// Nom complet.
    pub name: String,
    /// Arité déclarée.
    pub arity: Option<usize>,
}

/// État de l'arène scratch vu du rapport.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScratchStats {
    /// Taille d'une page en octets.
    pub page_size: usize,
    /// Pages matérialisées.
    pub pages: usize,
    /// Page courante.
    pub current: u32,
    /// Octets réservés, toutes pages confondues.
    pub used: usize,
    /// Capacité totale matérialisée.
    pub capacity: usize,
    /// Watermark de chaque page, dans l'ordre des pages.
    pub watermarks: Vec<u32>,
}

/// Rapport complet : liaisons, compteurs, scratch.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeReport {
    /// Version du crate pont.
    pub version: String,
    /// Compteurs au moment de la photo.
    pub stats: BridgeStats,
    /// Liaisons dans l'ordre d'enregistrement.
    pub bindings: Vec<BindingInfo>,
    /// État de l'arène.
    pub scratch: ScratchStats,
}

impl BridgeReport {
    /// Rendu texte multi-lignes (même contenu que la forme sérialisée).
    pub fn stringify(&self) -> String {
        use fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "pont bridge v{}", self.version);
        let _ = writeln!(
            out,
            "liaisons: {} (appels={}, fautes={})",
            self.stats.bindings, self.stats.calls, self.stats.faults
        );
        for b in &self.bindings {
            match b.arity {
                Some(n) => { let _ = writeln!(out, "  - {} /{n}", b.name); }
                None => { let _ = writeln!(out, "  - {} /?", b.name); }
            }
        }
        let _ = writeln!(
            out,
            "scratch: {} page(s) de {} o, {} o occupés, courante page#{}",
            self.scratch.pages, self.scratch.page_size, self.scratch.used, self.scratch.current
        );
        for (i, used) in self.scratch.watermarks.iter().enumerate() {
            let _ = writeln!(out, "  page#{i}: {used} o");
        }
        out
    }
}

/* --------------------------- Liaisons de service --------------------------- */

fn native_version(_args: &[Value], _ctx: &mut HostCtx) -> PResult<Value> {
    Ok(Value::Str(env!("CARGO_PKG_VERSION").to_string()))
}

fn native_debug(_args: &[Value], ctx: &mut HostCtx) -> PResult<Value> {
    // le dump a besoin du registre : il part du pont, au retour de l'appel
    ctx.request_debug();
    Ok(Value::Null)
}

/* ----------------------------- Macro sucrée ----------------------------- */

/// Macro pour déclarer une native rapidement.
///
/// # Exemple
/// ```
/// use pont_bind::{pont_native, Bridge, Value};
/// pont_native!(double |args, _ctx| {
///     let x: i64 = args.get(0).cloned().unwrap_or(Value::I64(0)).try_into()?;
///     Ok(Value::I64(x * 2))
/// });
///
/// let mut bridge = Bridge::new();
/// bridge.bind_with_arity("math.double", 1, double).unwrap();
/// assert_eq!(bridge.call("math.double", &[Value::I64(21)]).unwrap(), Value::I64(42));
/// ```
#[macro_export]
macro_rules! pont_native {
    ($name:ident |$args:ident, $ctx:ident| $body:block) => {
        pub fn $name(
            $args: &[$crate::Value],
            $ctx: &mut $crate::HostCtx,
        ) -> $crate::PResult<$crate::Value> {
            $body
        }
    };
}

/* ------------------------ Outil de capture stdout ------------------------ */

/// Petit writer qui **capture** le stdout dans une String (utile en tests).
#[derive(Default, Clone)]
pub struct Captured(std::sync::Arc<std::sync::Mutex<String>>);

impl Captured {
    /// Récupère le buffer (copie).
    pub fn get(&self) -> String { self.0.lock().unwrap().clone() }
    /// Réinitialise le buffer.
    pub fn clear(&self) { self.0.lock().unwrap().clear(); }
}
impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.0.lock().unwrap().push_str(&s);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/* -------------------------------- Prelude -------------------------------- */

/// Prelude pratique pour importer d'un coup.
pub mod prelude {
    pub use crate::{
        Binding, BoundFn, Bridge, BridgeReport, BridgeStats, Captured, Error, HostCtx, PResult,
        ScratchSlice, Value, pont_native,
    };
    pub use pont_scratch::{
        Checkpoint, PageId, ScratchAddr, ScratchArena, ScratchError, ScratchScope,
    };
}

/* --------------------------------- Tests --------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn double(args: &[Value], _ctx: &mut HostCtx) -> PResult<Value> {
        let x: i64 = args[0].clone().try_into()?;
        Ok(Value::I64(x * 2))
    }

    fn echo_upper(args: &[Value], ctx: &mut HostCtx) -> PResult<Value> {
        let s: String = args[0].clone().try_into()?;
        ctx.writeln_str(&s.to_uppercase())?;
        Ok(Value::Null)
    }

    fn reverse_scratch(args: &[Value], ctx: &mut HostCtx) -> PResult<Value> {
        let slice: ScratchSlice = args[0].clone().try_into()?;
        let mut bytes = ctx.fetch(slice)?.to_vec();
        bytes.reverse();
        Ok(Value::Scratch(ctx.stash(&bytes)?))
    }

    fn boom(_args: &[Value], _ctx: &mut HostCtx) -> PResult<Value> {
        Err(Error::Msg("boom".into()))
    }

    #[test]
    fn bind_and_call_roundtrip() {
        let mut bridge = Bridge::new();
        bridge.bind_with_arity("math.double", 1, double).unwrap();
        let out = bridge.call("math.double", &[Value::I64(21)]).unwrap();
        assert_eq!(out, Value::I64(42));
        assert_eq!(bridge.stats().calls, 1);
        assert_eq!(bridge.stats().faults, 0);
    }

    #[test]
    fn duplicate_bind_rejected() {
        let mut bridge = Bridge::new();
        bridge.bind("math.double", double).unwrap();
        let err = bridge.bind("math.double", boom).unwrap_err();
        match err {
            Error::Duplicate(name) => assert_eq!(name, "math.double"),
            other => panic!("attendu Duplicate, reçu {other}"),
        }
        // la première liaison reste en place
        assert_eq!(bridge.call("math.double", &[Value::I64(2)]).unwrap(), Value::I64(4));
    }

    #[test]
    fn rebind_replaces_and_returns_previous() {
        let mut bridge = Bridge::new();
        bridge.bind_with_arity("math.op", 1, double).unwrap();
        let prev = bridge.rebind(Binding { name: "math.op".into(), arity: Some(0), func: boom });
        assert!(prev.is_some());
        assert_eq!(bridge.len(), 1);
        let err = bridge.call("math.op", &[]).unwrap_err();
        match err {
            Error::Msg(m) => assert_eq!(m, "boom"),
            other => panic!("attendu Msg, reçu {other}"),
        }
    }

    #[test]
    fn missing_binding_is_a_fault() {
        let mut bridge = Bridge::new();
        let err = bridge.call("nulle.part", &[]).unwrap_err();
        match err {
            Error::NotFound(name) => assert_eq!(name, "nulle.part"),
            other => panic!("attendu NotFound, reçu {other}"),
        }
        assert_eq!(bridge.stats().faults, 1);
        assert_eq!(bridge.stats().calls, 0);
    }

    #[test]
    fn arity_checked_when_declared() {
        let mut bridge = Bridge::new();
        bridge.bind_with_arity("math.double", 1, double).unwrap();
        let err = bridge.call("math.double", &[]).unwrap_err();
        match err {
            Error::Arity { expected, got } => {
                assert_eq!(expected, 1);
                assert_eq!(got, 0);
            }
            other => panic!("attendu Arity, reçu {other}"),
        }
        // arité libre : tout passe
        bridge.bind("libre", |args, _| Ok(Value::I64(args.len() as i64))).unwrap();
        assert_eq!(bridge.call("libre", &[Value::Null, Value::Null]).unwrap(), Value::I64(2));
    }

    #[test]
    fn native_fault_counted() {
        let mut bridge = Bridge::new();
        bridge.bind("t.boom", boom).unwrap();
        assert!(bridge.call("t.boom", &[]).is_err());
        let stats = bridge.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.faults, 1);
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(7i32), Value::I64(7));
        assert_eq!(Value::from("sept"), Value::Str("sept".into()));
        let x: f64 = Value::I64(2).try_into().unwrap();
        assert_eq!(x, 2.0);
        let err = i64::try_from(Value::Null).unwrap_err();
        match err {
            Error::Type(t) => assert_eq!(t, "i64"),
            other => panic!("attendu Type, reçu {other}"),
        }
    }

    #[test]
    fn value_debug_truncates_long_strings() {
        let long = "x".repeat(80);
        let dbg = format!("{:?}", Value::Str(long));
        assert!(dbg.contains('…'));
        assert!(dbg.len() < 80);
    }

    #[test]
    fn value_debug_truncates_on_char_boundary() {
        // 'é' à cheval sur la limite des 64 octets
        let long = format!("{}é puis la suite du texte", "a".repeat(63));
        let dbg = format!("{:?}", Value::Str(long));
        assert_eq!(dbg, format!("Str({}…)", "a".repeat(63)));
    }

    #[test]
    fn scratch_values_travel_through_natives() {
        let mut bridge = Bridge::new();
        bridge.bind_with_arity("buf.reverse", 1, reverse_scratch).unwrap();
        let slice = bridge.ctx_mut().stash(b"pont").unwrap();
        let out = bridge.call("buf.reverse", &[Value::Scratch(slice)]).unwrap();
        let out_slice: ScratchSlice = out.try_into().unwrap();
        assert_eq!(bridge.ctx().fetch(out_slice).unwrap(), b"tnop");
    }

    #[test]
    fn str_marshalling_checks_utf8() {
        let mut bridge = Bridge::new();
        let ok = bridge.ctx_mut().stash_str("éphémère").unwrap();
        assert_eq!(bridge.ctx().fetch_str(ok).unwrap(), "éphémère");

        let bad = bridge.ctx_mut().stash(&[0xFF, 0xFE]).unwrap();
        match bridge.ctx().fetch_str(bad).unwrap_err() {
            Error::Utf8 => {}
            other => panic!("attendu Utf8, reçu {other}"),
        }
    }

    #[test]
    fn dangling_scratch_value_fails_cleanly() {
        let mut bridge = Bridge::new();
        let cp = bridge.ctx().scratch.mark();
        let slice = bridge.ctx_mut().stash(b"ephemere").unwrap();
        bridge.ctx_mut().scratch.rollback(cp).unwrap();
        let err = bridge.ctx().fetch(slice).unwrap_err();
        match err {
            Error::Scratch(ScratchError::Bounds) => {}
            other => panic!("attendu Bounds, reçu {other}"),
        }
    }

    #[test]
    fn captured_stdout_sees_native_output() {
        let (mut bridge, cap) = Bridge::with_captured_stdout();
        bridge.bind_with_arity("io.crier", 1, echo_upper).unwrap();
        bridge.call("io.crier", &[Value::from("allo")]).unwrap();
        assert_eq!(cap.get(), "ALLO\n");
    }

    #[test]
    fn env_shared_between_natives() {
        fn set(args: &[Value], ctx: &mut HostCtx) -> PResult<Value> {
            let key: String = args[0].clone().try_into()?;
            ctx.env.insert(key, args[1].clone());
            Ok(Value::Null)
        }
        fn get(args: &[Value], ctx: &mut HostCtx) -> PResult<Value> {
            let key: String = args[0].clone().try_into()?;
            Ok(ctx.env.get(&key).cloned().unwrap_or(Value::Null))
        }

        let mut bridge = Bridge::new();
        bridge.bind_with_arity("env.set", 2, set).unwrap();
        bridge.bind_with_arity("env.get", 1, get).unwrap();
        bridge.call("env.set", &[Value::from("graine"), Value::I64(4)]).unwrap();
        assert_eq!(bridge.call("env.get", &[Value::from("graine")]).unwrap(), Value::I64(4));
    }

    #[test]
    fn defaults_expose_version_and_debug() {
        let (mut bridge, cap) = Bridge::with_captured_stdout();
        bridge.install_defaults().unwrap();

        let v = bridge.call("pont.version", &[]).unwrap();
        assert_eq!(v, Value::Str(env!("CARGO_PKG_VERSION").into()));

        bridge.call("pont.debug", &[]).unwrap();
        let out = cap.get();
        assert!(out.contains("pont bridge v"));
        assert!(out.contains("pont.version /0"));
        assert!(out.contains("liaisons: 2"));
        assert!(out.contains("  page#0: 0 o"));
    }

    #[test]
    fn report_lists_bindings_in_order() {
        let mut bridge = Bridge::with_defaults();
        bridge.bind("z.dernier", boom).unwrap();
        let report = bridge.debug_report();
        let names: Vec<&str> = report.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["pont.version", "pont.debug", "z.dernier"]);
        assert_eq!(report.stats.bindings, 3);
        assert!(report.stringify().contains("z.dernier /?"));
    }

    #[test]
    fn report_tracks_per_page_watermarks() {
        let mut bridge = Bridge::new().with_scratch(ScratchArena::with_page_size(32));
        bridge.ctx_mut().stash(&[7u8; 24]).unwrap();
        bridge.ctx_mut().stash(&[7u8; 24]).unwrap(); // déborde sur la page 1
        let report = bridge.debug_report();
        assert_eq!(report.scratch.pages, 2);
        assert_eq!(report.scratch.watermarks, [24, 24]);
        assert!(report.stringify().contains("  page#1: 24 o"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn report_serializes_to_json() {
        let bridge = Bridge::with_defaults();
        let json = serde_json::to_string(&bridge.debug_report()).unwrap();
        assert!(json.contains("\"pont.version\""));
        let back: BridgeReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bridge.debug_report());
    }
}
